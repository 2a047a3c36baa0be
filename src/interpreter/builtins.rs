//=====================================================
// File: interpreter/builtins.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script-visible host surface
// Objective: Install the global bindings a submitted script can reach and
//            route every scheduling primitive through the Scheduler
//=====================================================

//=============================================
//            Section 1: Imports & Builtin Table
//=============================================

use super::errors::ErrorKind;
use super::promise::{new_promise, PromiseRef, ReactionKind};
use super::value::{format_number, ArrayRef, NativeFunction, Scope, Value};
use super::{callback_source, source_of, Callback, Completion, EvalResult, Interpreter, Job};
use crate::ast::Expr;
use crate::event::{ConsoleLevel, SourceRange};
use crate::harness::Scheduler;
use crate::runtime::IoRequest;
use crate::tokenizer::Position;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const MAX_STRING_LENGTH: usize = 1 << 24;

/// State shared by the methods of one `net.Server` object.
#[derive(Default)]
pub struct ServerState {
    socket: Option<u64>,
    close_listeners: Vec<Value>,
    closed: bool,
}

pub type ServerRef = Rc<RefCell<ServerState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Max,
    Min,
    Random,
}

/// Every native function a script can call.
#[derive(Clone)]
pub enum Builtin {
    Console(ConsoleLevel),
    SetTimeout,
    SetInterval,
    SetImmediate,
    ClearTimeout,
    ClearInterval,
    ClearImmediate,
    QueueMicrotask,
    NextTick,
    QueuePending,
    Fetch,
    ReadFile,
    Require,
    CreateServer,
    ServerListen(ServerRef),
    ServerOn(ServerRef),
    ServerClose(ServerRef),
    PromiseConstructor,
    PromiseResolve,
    PromiseReject,
    ResolveFunction {
        promise: PromiseRef,
        already: Rc<Cell<bool>>,
    },
    RejectFunction {
        promise: PromiseRef,
        already: Rc<Cell<bool>>,
    },
    JsonStringify,
    JsonParse,
    Math(MathFn),
    DateNow,
    ErrorConstructor(ErrorKind),
    ResponseText(Rc<str>),
    ResponseJson(Rc<str>),
}

impl Builtin {
    /// Server methods return their receiver so calls can be chained.
    fn returns_receiver(&self) -> bool {
        matches!(
            self,
            Builtin::ServerListen(_) | Builtin::ServerOn(_) | Builtin::ServerClose(_)
        )
    }
}

fn object_of(entries: Vec<(&str, Value)>) -> Value {
    Value::object(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

pub(super) fn response_object(url: &str, status: u16, body: &str) -> Value {
    let body: Rc<str> = Rc::from(body);
    object_of(vec![
        ("status", Value::Number(f64::from(status))),
        ("ok", Value::Bool((200..300).contains(&status))),
        ("url", Value::string(url)),
        ("text", Value::native("text", Builtin::ResponseText(Rc::clone(&body)))),
        ("json", Value::native("json", Builtin::ResponseJson(body))),
    ])
}

//=============================================
//            Section 2: Global Installation
//=============================================

impl<S: Scheduler> Interpreter<S> {
    pub(super) fn install_globals(&mut self) {
        let fs = object_of(vec![("readFile", Value::native("readFile", Builtin::ReadFile))]);
        let net = object_of(vec![(
            "createServer",
            Value::native("createServer", Builtin::CreateServer),
        )]);
        self.modules.insert("fs", fs.clone());
        self.modules.insert("net", net);

        let console = object_of(vec![
            ("log", Value::native("log", Builtin::Console(ConsoleLevel::Log))),
            ("warn", Value::native("warn", Builtin::Console(ConsoleLevel::Warn))),
            ("error", Value::native("error", Builtin::Console(ConsoleLevel::Error))),
        ]);
        let process = object_of(vec![
            ("nextTick", Value::native("nextTick", Builtin::NextTick)),
            ("env", Value::object(IndexMap::new())),
        ]);
        let json = object_of(vec![
            ("stringify", Value::native("stringify", Builtin::JsonStringify)),
            ("parse", Value::native("parse", Builtin::JsonParse)),
        ]);
        let math = object_of(vec![
            ("floor", Value::native("floor", Builtin::Math(MathFn::Floor))),
            ("ceil", Value::native("ceil", Builtin::Math(MathFn::Ceil))),
            ("round", Value::native("round", Builtin::Math(MathFn::Round))),
            ("abs", Value::native("abs", Builtin::Math(MathFn::Abs))),
            ("sqrt", Value::native("sqrt", Builtin::Math(MathFn::Sqrt))),
            ("max", Value::native("max", Builtin::Math(MathFn::Max))),
            ("min", Value::native("min", Builtin::Math(MathFn::Min))),
            ("random", Value::native("random", Builtin::Math(MathFn::Random))),
            ("PI", Value::Number(std::f64::consts::PI)),
        ]);
        let date = object_of(vec![("now", Value::native("now", Builtin::DateNow))]);

        let mut bindings = vec![
            ("console", console),
            ("process", process),
            ("JSON", json),
            ("Math", math),
            ("Date", date),
            ("fs", fs),
            ("Promise", Value::native("Promise", Builtin::PromiseConstructor)),
            ("setTimeout", Value::native("setTimeout", Builtin::SetTimeout)),
            ("setInterval", Value::native("setInterval", Builtin::SetInterval)),
            ("setImmediate", Value::native("setImmediate", Builtin::SetImmediate)),
            ("clearTimeout", Value::native("clearTimeout", Builtin::ClearTimeout)),
            ("clearInterval", Value::native("clearInterval", Builtin::ClearInterval)),
            ("clearImmediate", Value::native("clearImmediate", Builtin::ClearImmediate)),
            ("queueMicrotask", Value::native("queueMicrotask", Builtin::QueueMicrotask)),
            (
                "__queuePendingCallback",
                Value::native("__queuePendingCallback", Builtin::QueuePending),
            ),
            ("fetch", Value::native("fetch", Builtin::Fetch)),
            ("require", Value::native("require", Builtin::Require)),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        for kind in ErrorKind::ALL {
            bindings.push((
                kind.as_str(),
                Value::native(kind.as_str(), Builtin::ErrorConstructor(kind)),
            ));
        }
        for (name, value) in bindings {
            Scope::declare(&self.globals, name, value, false);
        }
    }

    pub(super) fn require_module(
        &mut self,
        name: &str,
        _site: Option<Position>,
    ) -> EvalResult<Value> {
        let key = name.strip_prefix("node:").unwrap_or(name);
        match self.modules.get(key) {
            Some(module) => Ok(module.clone()),
            None => Err(self.throw_error(
                ErrorKind::Error,
                &format!("Cannot find module '{}'", name),
            )),
        }
    }

    /// Static members of native constructors, e.g. `Promise.resolve`.
    pub(super) fn native_member(&self, native: &NativeFunction, name: &str) -> Value {
        match (&native.builtin, name) {
            (Builtin::PromiseConstructor, "resolve") => {
                Value::native("resolve", Builtin::PromiseResolve)
            }
            (Builtin::PromiseConstructor, "reject") => {
                Value::native("reject", Builtin::PromiseReject)
            }
            (_, "name") => Value::string(native.name),
            _ => Value::Undefined,
        }
    }

    //=============================================
    //            Section 3: Native Calls
    //=============================================

    fn expect_callback(&self, args: &[Value], index: usize) -> EvalResult<Value> {
        let value = arg(args, index);
        if value.is_callable() {
            Ok(value)
        } else {
            Err(self.throw_error(
                ErrorKind::TypeError,
                &format!(
                    "The \"callback\" argument must be of type function. Received {}",
                    value.to_js_string()
                ),
            ))
        }
    }

    fn callback(function: Value, args: Vec<Value>) -> Callback {
        let source = callback_source(&function);
        Callback {
            job: Job::Call { function, args },
            source,
        }
    }

    pub(super) fn call_builtin(
        &mut self,
        native: &NativeFunction,
        args: Vec<Value>,
        site: Option<Position>,
    ) -> EvalResult<Value> {
        let site: Option<SourceRange> = site.map(source_of);
        match &native.builtin {
            Builtin::Console(level) => {
                let rendered = args.iter().map(Value::to_console_json).collect();
                self.scheduler.console(*level, rendered, site)?;
                Ok(Value::Undefined)
            }
            Builtin::SetTimeout | Builtin::SetInterval => {
                let function = self.expect_callback(&args, 0)?;
                let delay = timer_delay(args.get(1));
                let callback = Self::callback(function, args.iter().skip(2).cloned().collect());
                let id = if matches!(native.builtin, Builtin::SetTimeout) {
                    self.scheduler.set_timeout(callback, delay, site)?
                } else {
                    self.scheduler.set_interval(callback, delay, site)?
                };
                Ok(Value::Number(id as f64))
            }
            Builtin::SetImmediate => {
                let function = self.expect_callback(&args, 0)?;
                let callback = Self::callback(function, args.iter().skip(1).cloned().collect());
                let id = self.scheduler.set_immediate(callback, site)?;
                Ok(Value::Number(id as f64))
            }
            Builtin::ClearTimeout | Builtin::ClearInterval | Builtin::ClearImmediate => {
                if let Some(id) = handle_id(args.first()) {
                    match native.builtin {
                        Builtin::ClearTimeout => self.scheduler.clear_timeout(id)?,
                        Builtin::ClearInterval => self.scheduler.clear_interval(id)?,
                        _ => self.scheduler.clear_immediate(id)?,
                    }
                }
                Ok(Value::Undefined)
            }
            Builtin::QueueMicrotask => {
                let function = self.expect_callback(&args, 0)?;
                self.scheduler
                    .queue_microtask(Self::callback(function, Vec::new()), "queueMicrotask callback")?;
                Ok(Value::Undefined)
            }
            Builtin::NextTick => {
                let function = self.expect_callback(&args, 0)?;
                let callback = Self::callback(function, args.iter().skip(1).cloned().collect());
                self.scheduler
                    .next_tick(callback, "process.nextTick callback")?;
                Ok(Value::Undefined)
            }
            Builtin::QueuePending => {
                let function = self.expect_callback(&args, 0)?;
                let label = match args.get(1) {
                    Some(Value::String(label)) => label.to_string(),
                    _ => "pending callback".to_string(),
                };
                self.scheduler
                    .queue_pending(Self::callback(function, Vec::new()), &label, site)?;
                Ok(Value::Undefined)
            }
            Builtin::Fetch => {
                let url = arg(&args, 0).to_js_string();
                let promise = new_promise();
                self.scheduler.start_request(
                    IoRequest::Fetch { url },
                    Completion::Promise(Rc::clone(&promise)),
                    site,
                )?;
                Ok(Value::Promise(promise))
            }
            Builtin::ReadFile => {
                let path = arg(&args, 0).to_js_string();
                let last = args.len().saturating_sub(1);
                let function = self.expect_callback(&args, last)?;
                self.scheduler.start_request(
                    IoRequest::ReadFile { path },
                    Completion::NodeCallback(function),
                    site,
                )?;
                Ok(Value::Undefined)
            }
            Builtin::Require => {
                let name = arg(&args, 0).to_js_string();
                self.require_module(&name, None)
            }
            Builtin::CreateServer => {
                let server: ServerRef = Rc::new(RefCell::new(ServerState::default()));
                Ok(object_of(vec![
                    ("listen", Value::native("listen", Builtin::ServerListen(Rc::clone(&server)))),
                    ("on", Value::native("on", Builtin::ServerOn(Rc::clone(&server)))),
                    ("close", Value::native("close", Builtin::ServerClose(server))),
                ]))
            }
            Builtin::ServerListen(server) => {
                let open = {
                    let state = server.borrow();
                    state.socket.is_none() && !state.closed
                };
                if open {
                    let socket = self.scheduler.open_socket("net.Server", site)?;
                    server.borrow_mut().socket = Some(socket);
                }
                if let Some(listener) = args.iter().rev().find(|value| value.is_callable()) {
                    let callback = Self::callback(listener.clone(), Vec::new());
                    self.scheduler.next_tick(callback, "listen callback")?;
                }
                Ok(Value::Undefined)
            }
            Builtin::ServerOn(server) => {
                let listener = arg(&args, 1);
                if arg(&args, 0).to_js_string() == "close" && listener.is_callable() {
                    server.borrow_mut().close_listeners.push(listener);
                }
                Ok(Value::Undefined)
            }
            Builtin::ServerClose(server) => {
                let (socket, listeners) = {
                    let mut state = server.borrow_mut();
                    if state.closed {
                        return Ok(Value::Undefined);
                    }
                    state.closed = true;
                    if let Some(callback) = args.first().filter(|value| value.is_callable()) {
                        state.close_listeners.push(callback.clone());
                    }
                    (state.socket.take(), std::mem::take(&mut state.close_listeners))
                };
                let listeners = listeners
                    .into_iter()
                    .map(|listener| Self::callback(listener, Vec::new()))
                    .collect();
                self.scheduler.close_socket(socket, listeners, site)?;
                Ok(Value::Undefined)
            }
            Builtin::PromiseConstructor => Err(self.throw_error(
                ErrorKind::TypeError,
                "Promise constructor cannot be invoked without 'new'",
            )),
            Builtin::PromiseResolve => self.promise_resolved(arg(&args, 0)),
            Builtin::PromiseReject => self.promise_rejected(arg(&args, 0)),
            Builtin::ResolveFunction { promise, already } => {
                if !already.replace(true) {
                    self.resolve_promise(promise, arg(&args, 0))?;
                }
                Ok(Value::Undefined)
            }
            Builtin::RejectFunction { promise, already } => {
                if !already.replace(true) {
                    self.reject_promise(promise, arg(&args, 0))?;
                }
                Ok(Value::Undefined)
            }
            Builtin::JsonStringify => {
                let pretty = arg(&args, 2).to_number() > 0.0;
                let Some(json) = arg(&args, 0).to_json() else {
                    return Ok(Value::Undefined);
                };
                let text = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                text.map(Value::string)
                    .map_err(|err| self.throw_error(ErrorKind::TypeError, &err.to_string()))
            }
            Builtin::JsonParse => self.parse_json(&arg(&args, 0).to_js_string()),
            Builtin::Math(function) => Ok(Value::Number(math(*function, &args))),
            Builtin::DateNow => Ok(Value::Number(self.scheduler.now_ms())),
            Builtin::ErrorConstructor(kind) => {
                let message = match arg(&args, 0) {
                    Value::Undefined => String::new(),
                    other => other.to_js_string(),
                };
                Ok(self.make_error(*kind, &message))
            }
            Builtin::ResponseText(body) => self.promise_resolved(Value::String(Rc::clone(body))),
            Builtin::ResponseJson(body) => match self.parse_json(body) {
                Ok(value) => self.promise_resolved(value),
                Err(super::RuntimeError::Thrown(error)) => self.promise_rejected(error),
                Err(abort) => Err(abort),
            },
        }
    }

    fn parse_json(&self, text: &str) -> EvalResult<Value> {
        serde_json::from_str::<serde_json::Value>(text)
            .map(|json| Value::from_json(&json))
            .map_err(|err| {
                self.throw_error(
                    ErrorKind::SyntaxError,
                    &format!("Unexpected token in JSON: {}", err),
                )
            })
    }

    //=============================================
    //            Section 4: Methods
    //=============================================

    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        site: Position,
        callee: &Expr,
    ) -> EvalResult<Value> {
        match receiver {
            Value::Promise(promise) => match name {
                "then" => self.promise_then(promise, ReactionKind::Then, arg(&args, 0), arg(&args, 1)),
                "catch" => {
                    self.promise_then(promise, ReactionKind::Catch, Value::Undefined, arg(&args, 0))
                }
                "finally" => {
                    self.promise_then(promise, ReactionKind::Finally, arg(&args, 0), Value::Undefined)
                }
                _ => Err(self.not_a_function(callee)),
            },
            Value::Array(items) => self.array_method(items, name, args, callee),
            Value::String(text) => self.string_method(text, name, args, callee),
            Value::Number(n) => match name {
                "toFixed" => {
                    let digits = arg(&args, 0).to_number();
                    let digits = if digits.is_finite() { digits.clamp(0.0, 100.0) as usize } else { 0 };
                    Ok(Value::string(format!("{:.*}", digits, n)))
                }
                "toString" => Ok(Value::string(format_number(*n))),
                _ => Err(self.not_a_function(callee)),
            },
            _ => {
                let method = self.get_member(receiver, name)?;
                if !method.is_callable() {
                    return Err(self.not_a_function(callee));
                }
                let result = self.call_value(&method, args, Some(site))?;
                match &method {
                    Value::Native(native) if native.builtin.returns_receiver() => {
                        Ok(receiver.clone())
                    }
                    _ => Ok(result),
                }
            }
        }
    }

    fn not_a_function(&self, callee: &Expr) -> super::RuntimeError {
        self.throw_error(
            ErrorKind::TypeError,
            &format!("{} is not a function", super::describe_expr(callee)),
        )
    }

    fn array_method(
        &mut self,
        items: &ArrayRef,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> EvalResult<Value> {
        match name {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            "shift" => {
                let mut items = items.borrow_mut();
                Ok(if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                })
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                for (offset, value) in args.into_iter().enumerate() {
                    items.insert(offset, value);
                }
                Ok(Value::Number(items.len() as f64))
            }
            "join" => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_js_string(),
                };
                let joined = items
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
                    .join(&separator);
                Ok(Value::string(joined))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Ok(Value::Bool(items.borrow().iter().any(|item| item.strict_equals(&needle))))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let index = items.borrow().iter().position(|item| item.strict_equals(&needle));
                Ok(Value::Number(index.map_or(-1.0, |i| i as f64)))
            }
            "slice" => {
                let items = items.borrow();
                let (start, end) = slice_bounds(&args, items.len());
                Ok(Value::array(items[start..end.max(start)].to_vec()))
            }
            "concat" => {
                let mut result = items.borrow().clone();
                for value in args {
                    match value {
                        Value::Array(other) => result.extend(other.borrow().iter().cloned()),
                        other => result.push(other),
                    }
                }
                Ok(Value::array(result))
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Ok(Value::Array(Rc::clone(items)))
            }
            "forEach" | "map" | "filter" | "find" | "findIndex" | "some" | "every" => {
                let function = self.expect_callback(&args, 0)?;
                let snapshot = items.borrow().clone();
                let mut mapped = Vec::new();
                for (index, item) in snapshot.into_iter().enumerate() {
                    let result = self.call_value(
                        &function,
                        vec![item.clone(), Value::Number(index as f64)],
                        None,
                    )?;
                    match name {
                        "map" => mapped.push(result),
                        "filter" if result.truthy() => mapped.push(item),
                        "find" if result.truthy() => return Ok(item),
                        "findIndex" if result.truthy() => return Ok(Value::Number(index as f64)),
                        "some" if result.truthy() => return Ok(Value::Bool(true)),
                        "every" if !result.truthy() => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name {
                    "map" | "filter" => Value::array(mapped),
                    "find" => Value::Undefined,
                    "findIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    _ => Value::Undefined,
                })
            }
            "reduce" => {
                let function = self.expect_callback(&args, 0)?;
                let snapshot = items.borrow().clone();
                let mut iter = snapshot.into_iter().enumerate();
                let mut accumulator = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(self.throw_error(
                                ErrorKind::TypeError,
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    },
                };
                for (index, item) in iter {
                    accumulator = self.call_value(
                        &function,
                        vec![accumulator, item, Value::Number(index as f64)],
                        None,
                    )?;
                }
                Ok(accumulator)
            }
            _ => Err(self.not_a_function(callee)),
        }
    }

    fn string_method(
        &mut self,
        text: &Rc<str>,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> EvalResult<Value> {
        let needle = || arg(&args, 0).to_js_string();
        match name {
            "toUpperCase" => Ok(Value::string(text.to_uppercase())),
            "toLowerCase" => Ok(Value::string(text.to_lowercase())),
            "trim" => Ok(Value::string(text.trim())),
            "toString" => Ok(Value::String(Rc::clone(text))),
            "includes" => Ok(Value::Bool(text.contains(needle().as_str()))),
            "startsWith" => Ok(Value::Bool(text.starts_with(needle().as_str()))),
            "endsWith" => Ok(Value::Bool(text.ends_with(needle().as_str()))),
            "indexOf" => Ok(Value::Number(
                text.find(needle().as_str())
                    .map_or(-1.0, |byte| text[..byte].chars().count() as f64),
            )),
            "split" => {
                let parts: Vec<Value> = match arg(&args, 0) {
                    Value::Undefined => vec![Value::String(Rc::clone(text))],
                    separator => {
                        let separator = separator.to_js_string();
                        if separator.is_empty() {
                            text.chars().map(|c| Value::string(c.to_string())).collect()
                        } else {
                            text.split(separator.as_str()).map(Value::string).collect()
                        }
                    }
                };
                Ok(Value::array(parts))
            }
            "slice" => {
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = slice_bounds(&args, chars.len());
                Ok(Value::string(chars[start..end.max(start)].iter().collect::<String>()))
            }
            "repeat" => {
                let count = arg(&args, 0).to_number();
                if !(0.0..=10_000.0).contains(&count) {
                    return Err(self.throw_error(ErrorKind::RangeError, "Invalid count value"));
                }
                Ok(Value::string(text.repeat(count as usize)))
            }
            "padStart" | "padEnd" => {
                let target = arg(&args, 0).to_number();
                let fill = match arg(&args, 1) {
                    Value::Undefined => " ".to_string(),
                    other => other.to_js_string(),
                };
                let length = text.chars().count();
                if target > MAX_STRING_LENGTH as f64 {
                    return Err(self.throw_error(ErrorKind::RangeError, "Invalid string length"));
                }
                if target.is_nan() || target as usize <= length || fill.is_empty() {
                    return Ok(Value::String(Rc::clone(text)));
                }
                let padding: String = fill.chars().cycle().take(target as usize - length).collect();
                Ok(Value::string(if name == "padStart" {
                    format!("{}{}", padding, text)
                } else {
                    format!("{}{}", text, padding)
                }))
            }
            _ => Err(self.not_a_function(callee)),
        }
    }
}

//=============================================
//            Section 5: Helpers
//=============================================

/// Timer delays: non-numbers, NaN and negatives all mean "as soon as possible".
fn timer_delay(value: Option<&Value>) -> f64 {
    value
        .map(Value::to_number)
        .filter(|delay| delay.is_finite() && *delay > 0.0)
        .unwrap_or(0.0)
}

fn handle_id(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
        _ => None,
    }
}

fn slice_bounds(args: &[Value], length: usize) -> (usize, usize) {
    let resolve = |value: Option<&Value>, default: usize| -> usize {
        match value {
            None | Some(Value::Undefined) => default,
            Some(value) => {
                let n = value.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    length.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(length)
                }
            }
        }
    };
    (resolve(args.first(), 0), resolve(args.get(1), length))
}

fn math(function: MathFn, args: &[Value]) -> f64 {
    let x = arg(args, 0).to_number();
    match function {
        MathFn::Floor => x.floor(),
        MathFn::Ceil => x.ceil(),
        MathFn::Round => (x + 0.5).floor(),
        MathFn::Abs => x.abs(),
        MathFn::Sqrt => x.sqrt(),
        MathFn::Max => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.max(n)
            }
        }),
        MathFn::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        MathFn::Random => rand::random::<f64>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_delays_treat_invalid_input_as_zero() {
        assert_eq!(timer_delay(None), 0.0);
        assert_eq!(timer_delay(Some(&Value::Number(-5.0))), 0.0);
        assert_eq!(timer_delay(Some(&Value::string("abc"))), 0.0);
        assert_eq!(timer_delay(Some(&Value::string("25"))), 25.0);
    }

    #[test]
    fn slice_bounds_handle_negative_offsets() {
        assert_eq!(slice_bounds(&[Value::Number(-2.0)], 5), (3, 5));
        assert_eq!(slice_bounds(&[Value::Number(1.0), Value::Number(10.0)], 5), (1, 5));
        assert_eq!(slice_bounds(&[], 3), (0, 3));
    }

    #[test]
    fn math_max_and_min_follow_script_rules() {
        assert_eq!(math(MathFn::Max, &[]), f64::NEG_INFINITY);
        assert_eq!(math(MathFn::Min, &[Value::Number(3.0), Value::Number(1.0)]), 1.0);
        assert!(math(MathFn::Max, &[Value::Number(1.0), Value::Undefined]).is_nan());
        assert_eq!(math(MathFn::Round, &[Value::Number(2.5)]), 3.0);
    }

    #[test]
    fn handle_ids_must_be_whole_numbers() {
        assert_eq!(handle_id(Some(&Value::Number(4.0))), Some(4));
        assert_eq!(handle_id(Some(&Value::Number(4.5))), None);
        assert_eq!(handle_id(Some(&Value::string("4"))), None);
    }

    #[test]
    fn responses_expose_status_and_ok() {
        let response = response_object("http://example.test/", 404, "missing");
        match response {
            Value::Object(object) => {
                let object = object.borrow();
                assert_eq!(object.get("status").to_number(), 404.0);
                assert!(!object.get("ok").truthy());
            }
            _ => panic!("expected an object"),
        }
    }
}
