//=====================================================
// File: interpreter/errors.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script error classification
// Objective: Model thrown script values and host aborts, and build the
//            error objects scripts can catch
//=====================================================

use super::value::{Object, ObjectClass, Value};
use crate::runtime::AbortReason;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Built-in error constructors exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    SyntaxError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::ReferenceError,
        ErrorKind::RangeError,
        ErrorKind::SyntaxError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

/// Why evaluation stopped abnormally.
///
/// `Thrown` unwinds to the nearest `try/catch`. `Abort` is raised by the host
/// (timeout, cancellation, event cap) and is never catchable by the script.
#[derive(Clone)]
pub enum RuntimeError {
    Thrown(Value),
    Abort(AbortReason),
}

impl RuntimeError {
    pub fn is_abort(&self) -> bool {
        matches!(self, RuntimeError::Abort(_))
    }
}

impl From<AbortReason> for RuntimeError {
    fn from(reason: AbortReason) -> Self {
        RuntimeError::Abort(reason)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Thrown(value) => write!(f, "Uncaught {}", value.to_js_string()),
            RuntimeError::Abort(reason) => write!(f, "{}", reason),
        }
    }
}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Builds an error instance with `name`, `message` and `stack` properties.
pub fn error_object(kind: ErrorKind, message: &str, stack: String) -> Value {
    let mut properties = IndexMap::new();
    properties.insert("name".to_string(), Value::string(kind.as_str()));
    properties.insert("message".to_string(), Value::string(message));
    properties.insert("stack".to_string(), Value::string(stack));
    Value::Object(Rc::new(RefCell::new(Object {
        class: ObjectClass::Error,
        properties,
    })))
}

/// Splits an uncaught value into the `message` and `stack` a
/// `RUNTIME_ERROR` carries. Error instances keep their own stack.
pub fn describe_thrown(value: &Value) -> (String, Option<String>) {
    if let Value::Object(object) = value {
        let object = object.borrow();
        if object.class == ObjectClass::Error {
            let message = object.get("message").to_js_string();
            let stack = match object.get("stack") {
                Value::String(stack) => Some(stack.to_string()),
                _ => None,
            };
            return (message, stack);
        }
    }
    (format!("Uncaught {}", value.to_js_string()), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_objects_render_name_and_message() {
        let error = error_object(ErrorKind::TypeError, "boom", "TypeError: boom".into());
        assert_eq!(error.to_js_string(), "TypeError: boom");
        let (message, stack) = describe_thrown(&error);
        assert_eq!(message, "boom");
        assert_eq!(stack.as_deref(), Some("TypeError: boom"));
    }

    #[test]
    fn thrown_primitives_describe_themselves() {
        let (message, stack) = describe_thrown(&Value::string("oops"));
        assert_eq!(message, "Uncaught oops");
        assert!(stack.is_none());
    }

    #[test]
    fn aborts_are_not_catchable() {
        let abort = RuntimeError::from(AbortReason::Cancelled);
        assert!(abort.is_abort());
        assert_eq!(abort.to_string(), "Script execution was cancelled");
    }
}
