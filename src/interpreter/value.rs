//=====================================================
// File: interpreter/value.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Runtime values and lexical scopes
// Objective: Represent script values with shared, interior-mutable
//            containers and provide the coercions the evaluator relies on
//=====================================================

//=============================================
//            Section 1: Imports
//=============================================

use super::builtins::Builtin;
use super::promise::{PromiseRef, PromiseState};
use crate::ast::FunctionDecl;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

const MAX_RENDER_DEPTH: usize = 8;

//=============================================
//            Section 2: Value Types
//=============================================

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<Object>>;
pub type Env = Rc<RefCell<Scope>>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Promise(PromiseRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Plain,
    /// Error instances render as `Name: message`.
    Error,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub class: ObjectClass,
    pub properties: IndexMap<String, Value>,
}

impl Object {
    pub fn plain() -> Self {
        Self {
            class: ObjectClass::Plain,
            properties: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Value {
        self.properties.get(key).cloned().unwrap_or(Value::Undefined)
    }
}

pub struct Closure {
    pub decl: Rc<FunctionDecl>,
    pub env: Env,
    pub name: String,
}

pub struct NativeFunction {
    pub name: &'static str,
    pub builtin: Builtin,
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Rc::from(text.as_ref()))
    }

    pub fn object(properties: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(Object {
            class: ObjectClass::Plain,
            properties,
        })))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn native(name: &'static str, builtin: Builtin) -> Self {
        Value::Native(Rc::new(NativeFunction { name, builtin }))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Promise(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    pub fn function_name(&self) -> Option<String> {
        match self {
            Value::Function(closure) => Some(closure.name.clone()),
            Value::Native(native) => Some(native.name.to_string()),
            _ => None,
        }
    }

    /// String conversion used by concatenation and templates.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(object) => {
                let object = object.borrow();
                match object.class {
                    ObjectClass::Error => error_summary(&object),
                    ObjectClass::Plain => "[object Object]".to_string(),
                }
            }
            Value::Function(_) | Value::Native(_) => self.describe_function(),
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }

    fn describe_function(&self) -> String {
        match self.function_name() {
            Some(name) if !name.is_empty() => format!("[Function: {}]", name),
            _ => "[Function (anonymous)]".to_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Structured rendering for `CONSOLE.args`: strings stay bare, containers nest.
    pub fn to_console_json(&self) -> JsonValue {
        self.render_console(0)
    }

    fn render_console(&self, depth: usize) -> JsonValue {
        if depth > MAX_RENDER_DEPTH {
            return JsonValue::String("[Circular]".to_string());
        }
        match self {
            Value::Undefined | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => number_json(*n).unwrap_or_else(|| JsonValue::String(format_number(*n))),
            Value::String(s) => JsonValue::String(s.to_string()),
            Value::Array(items) => JsonValue::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| item.render_console(depth + 1))
                    .collect(),
            ),
            Value::Object(object) => {
                let object = object.borrow();
                if object.class == ObjectClass::Error {
                    return JsonValue::String(error_summary(&object));
                }
                let mut map = JsonMap::new();
                for (key, value) in &object.properties {
                    map.insert(key.clone(), value.render_console(depth + 1));
                }
                JsonValue::Object(map)
            }
            Value::Function(_) | Value::Native(_) => JsonValue::String(self.describe_function()),
            Value::Promise(promise) => {
                let state = match &promise.borrow().state {
                    PromiseState::Pending => "<pending>".to_string(),
                    PromiseState::Fulfilled(value) => value.to_js_string(),
                    PromiseState::Rejected(value) => format!("<rejected> {}", value.to_js_string()),
                };
                JsonValue::String(format!("Promise {{ {} }}", state))
            }
        }
    }

    /// `JSON.stringify` semantics: `None` for values the serializer skips.
    pub fn to_json(&self) -> Option<JsonValue> {
        self.render_json(0)
    }

    fn render_json(&self, depth: usize) -> Option<JsonValue> {
        if depth > MAX_RENDER_DEPTH {
            return Some(JsonValue::Null);
        }
        match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) => None,
            Value::Null => Some(JsonValue::Null),
            Value::Bool(b) => Some(JsonValue::Bool(*b)),
            Value::Number(n) => Some(number_json(*n).unwrap_or(JsonValue::Null)),
            Value::String(s) => Some(JsonValue::String(s.to_string())),
            Value::Array(items) => Some(JsonValue::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| item.render_json(depth + 1).unwrap_or(JsonValue::Null))
                    .collect(),
            )),
            Value::Object(object) => {
                let mut map = JsonMap::new();
                let object = object.borrow();
                if object.class == ObjectClass::Error {
                    return Some(JsonValue::Object(map));
                }
                for (key, value) in &object.properties {
                    if let Some(json) = value.render_json(depth + 1) {
                        map.insert(key.clone(), json);
                    }
                }
                Some(JsonValue::Object(map))
            }
            Value::Promise(_) => Some(JsonValue::Object(JsonMap::new())),
        }
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::string(s),
            JsonValue::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => f.write_str(&other.to_js_string()),
        }
    }
}

fn error_summary(object: &Object) -> String {
    let name = object.get("name").to_js_string();
    let message = object.get("message").to_js_string();
    if message.is_empty() {
        name
    } else {
        format!("{}: {}", name, message)
    }
}

fn number_json(n: f64) -> Option<JsonValue> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Some(JsonValue::Number(JsonNumber::from(n as i64)));
    }
    JsonNumber::from_f64(n).map(JsonValue::Number)
}

/// Formats a number the way script string conversion does: `3`, `0.5`, `NaN`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

//=============================================
//            Section 3: Scopes
//=============================================

#[derive(Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

pub struct Scope {
    vars: HashMap<String, Binding>,
    parent: Option<Env>,
    function_scope: bool,
}

/// Why an assignment to a name failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn new_env(parent: Option<Env>, function_scope: bool) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent,
            function_scope,
        }))
    }

    /// A sibling scope holding copies of this scope's bindings, used for
    /// per-iteration `let` bindings in `for` loops.
    pub fn duplicate(env: &Env) -> Env {
        let scope = env.borrow();
        Rc::new(RefCell::new(Scope {
            vars: scope.vars.clone(),
            parent: scope.parent.clone(),
            function_scope: scope.function_scope,
        }))
    }

    pub fn declare(env: &Env, name: &str, value: Value, mutable: bool) {
        env.borrow_mut()
            .vars
            .insert(name.to_string(), Binding { value, mutable });
    }

    /// `var` bindings live in the nearest function (or global) scope.
    pub fn declare_var(env: &Env, name: &str, value: Option<Value>) {
        let target = Self::function_scope_of(env);
        let mut scope = target.borrow_mut();
        match (scope.vars.get_mut(name), value) {
            (Some(binding), Some(value)) => binding.value = value,
            (Some(_), None) => {}
            (None, value) => {
                scope.vars.insert(
                    name.to_string(),
                    Binding {
                        value: value.unwrap_or(Value::Undefined),
                        mutable: true,
                    },
                );
            }
        }
    }

    fn function_scope_of(env: &Env) -> Env {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let scope = current.borrow();
                if scope.function_scope {
                    return Rc::clone(&current);
                }
                match &scope.parent {
                    Some(parent) => Rc::clone(parent),
                    None => return Rc::clone(&current),
                }
            };
            current = next;
        }
    }

    pub fn lookup(env: &Env, name: &str) -> Option<Value> {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let scope = current.borrow();
                if let Some(binding) = scope.vars.get(name) {
                    return Some(binding.value.clone());
                }
                Rc::clone(scope.parent.as_ref()?)
            };
            current = next;
        }
    }

    pub fn assign(env: &Env, name: &str, value: Value) -> Result<(), AssignError> {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let mut scope = current.borrow_mut();
                if let Some(binding) = scope.vars.get_mut(name) {
                    if !binding.mutable {
                        return Err(AssignError::Constant);
                    }
                    binding.value = value;
                    return Ok(());
                }
                match &scope.parent {
                    Some(parent) => Rc::clone(parent),
                    None => return Err(AssignError::Undeclared),
                }
            };
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting_matches_script_conversion() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn loose_equality_coerces_numbers_and_strings() {
        assert!(Value::Number(1.0).loose_equals(&Value::string("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
        assert!(!Value::Number(1.0).strict_equals(&Value::string("1")));
    }

    #[test]
    fn arrays_join_when_stringified() {
        let array = Value::array(vec![Value::Number(1.0), Value::Null, Value::string("x")]);
        assert_eq!(array.to_js_string(), "1,,x");
    }

    #[test]
    fn const_bindings_reject_assignment() {
        let env = Scope::new_env(None, true);
        Scope::declare(&env, "x", Value::Number(1.0), false);
        assert_eq!(
            Scope::assign(&env, "x", Value::Number(2.0)),
            Err(AssignError::Constant)
        );
        assert_eq!(
            Scope::assign(&env, "y", Value::Number(2.0)),
            Err(AssignError::Undeclared)
        );
    }

    #[test]
    fn var_declarations_hoist_to_function_scope() {
        let global = Scope::new_env(None, true);
        let block = Scope::new_env(Some(Rc::clone(&global)), false);
        Scope::declare_var(&block, "v", Some(Value::Number(4.0)));
        assert!(Scope::lookup(&global, "v").is_some());
    }

    #[test]
    fn duplicated_scope_is_independent() {
        let env = Scope::new_env(None, false);
        Scope::declare(&env, "i", Value::Number(0.0), true);
        let copy = Scope::duplicate(&env);
        Scope::assign(&copy, "i", Value::Number(1.0)).unwrap();
        assert_eq!(Scope::lookup(&env, "i").unwrap().to_number(), 0.0);
    }

    #[test]
    fn console_rendering_keeps_structure() {
        let value = Value::object(IndexMap::from([
            ("a".to_string(), Value::Number(1.0)),
            ("b".to_string(), Value::array(vec![Value::Bool(true)])),
        ]));
        assert_eq!(
            value.to_console_json(),
            serde_json::json!({"a": 1, "b": [true]})
        );
    }
}
