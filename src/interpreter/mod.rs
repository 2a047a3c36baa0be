//=====================================================
// File: interpreter/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Tree-walking evaluator for submitted scripts
// Objective: Execute parsed programs against an injected Scheduler so every
//            scheduling primitive a script touches is observable
//=====================================================

pub mod builtins;
pub mod errors;
pub mod promise;
pub mod value;

//=============================================
//            Section 1: Imports & Work Units
//=============================================

use crate::ast::{
    BinaryOp, DeclKind, Expr, FunctionBody, FunctionDecl, Literal, LogicalOp, Program, Stmt,
    TemplatePart, UnaryOp,
};
use crate::event::SourceRange;
use crate::harness::Scheduler;
use crate::runtime::{IoFailure, IoPayload, RunControl};
use crate::tokenizer::Position;
use indexmap::IndexMap;
use std::rc::Rc;

pub use builtins::Builtin;
pub use errors::{describe_thrown, ErrorKind, RuntimeError};
pub use promise::{PromiseRef, PromiseState, Reaction, ReactionKind};
pub use value::{AssignError, Env, Scope, Value};

/// Largest length an array may grow to through index or `length` assignment.
pub const MAX_ARRAY_LENGTH: usize = 1 << 22;

/// A unit of script work the host loop runs later.
#[derive(Clone)]
pub enum Job {
    Call {
        function: Value,
        args: Vec<Value>,
    },
    Reaction {
        reaction: Reaction,
        outcome: Result<Value, Value>,
    },
    /// Adopts the state of a promise or thenable; `then: None` means a native promise.
    ResolveThenable {
        promise: PromiseRef,
        thenable: Value,
        then: Option<Value>,
    },
    Settle {
        promise: PromiseRef,
        outcome: Result<Value, Value>,
    },
}

/// A job plus the source position of the code it will run.
#[derive(Clone)]
pub struct Callback {
    pub job: Job,
    pub source: Option<SourceRange>,
}

/// Where the result of an I/O request is delivered.
#[derive(Clone)]
pub enum Completion {
    /// Node-style `(err, data)` callback.
    NodeCallback(Value),
    Promise(PromiseRef),
}

pub(crate) fn source_of(position: Position) -> SourceRange {
    let line = u32::try_from(position.line).unwrap_or(u32::MAX);
    let col = u32::try_from(position.column).unwrap_or(u32::MAX);
    SourceRange::new(line, col)
}

/// Definition site of a script function; natives have none.
pub fn callback_source(value: &Value) -> Option<SourceRange> {
    match value {
        Value::Function(closure) => Some(source_of(closure.decl.position)),
        _ => None,
    }
}

//=============================================
//            Section 2: Interpreter State
//=============================================

#[derive(Debug, Clone, Copy)]
pub struct InterpreterOptions {
    pub max_call_depth: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 512,
        }
    }
}

#[derive(Debug, Clone)]
struct StackEntry {
    name: String,
    position: Position,
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type EvalResult<T> = Result<T, RuntimeError>;

pub struct Interpreter<S: Scheduler> {
    scheduler: S,
    globals: Env,
    call_stack: Vec<StackEntry>,
    options: InterpreterOptions,
    control: RunControl,
    unhandled: Vec<PromiseRef>,
    modules: IndexMap<&'static str, Value>,
}

impl<S: Scheduler> Interpreter<S> {
    pub fn new(scheduler: S, control: RunControl, options: InterpreterOptions) -> Self {
        let globals = Scope::new_env(None, true);
        let mut interpreter = Self {
            scheduler,
            globals,
            call_stack: Vec::new(),
            options,
            control,
            unhandled: Vec::new(),
            modules: IndexMap::new(),
        };
        interpreter.install_globals();
        interpreter
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn into_scheduler(self) -> S {
        self.scheduler
    }

    /// Runs the main script body synchronously.
    pub fn run_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        let env = Rc::clone(&self.globals);
        self.call_stack.clear();
        match self.execute_block(&program.body, &env)? {
            Flow::Normal | Flow::Return(_) | Flow::Break | Flow::Continue => Ok(()),
        }
    }

    /// Runs one job handed back by the host loop.
    pub fn invoke(&mut self, job: Job) -> Result<(), RuntimeError> {
        self.call_stack.clear();
        match job {
            Job::Call { function, args } => self.call_value(&function, args, None).map(|_| ()),
            Job::Reaction { reaction, outcome } => self.run_reaction(reaction, outcome),
            Job::ResolveThenable {
                promise,
                thenable,
                then,
            } => self.run_resolve_thenable(promise, thenable, then),
            Job::Settle { promise, outcome } => match outcome {
                Ok(value) => self.resolve_promise(&promise, value),
                Err(reason) => self.reject_promise(&promise, reason),
            },
        }
    }

    /// Converts a finished I/O request into the job that delivers its result.
    pub fn complete_io(
        &mut self,
        completion: Completion,
        result: Result<IoPayload, IoFailure>,
    ) -> Job {
        match completion {
            Completion::NodeCallback(function) => {
                let args = match result {
                    Ok(payload) => vec![Value::Null, self.payload_value(payload)],
                    Err(failure) => vec![self.make_error(ErrorKind::Error, &failure.to_string())],
                };
                Job::Call { function, args }
            }
            Completion::Promise(promise) => {
                let outcome = match result {
                    Ok(payload) => Ok(self.payload_value(payload)),
                    Err(failure) => Err(self.make_error(
                        ErrorKind::TypeError,
                        &format!("fetch failed: {}", failure),
                    )),
                };
                Job::Settle { promise, outcome }
            }
        }
    }

    /// Message and stack for a `RUNTIME_ERROR` event.
    pub fn describe_error(&self, error: &RuntimeError) -> (String, Option<String>) {
        match error {
            RuntimeError::Thrown(value) => describe_thrown(value),
            RuntimeError::Abort(reason) => (reason.to_string(), None),
        }
    }

    //=============================================
    //            Section 3: Errors
    //=============================================

    /// Error instance whose stack lists the active script frames.
    pub(crate) fn make_error(&self, kind: ErrorKind, message: &str) -> Value {
        let mut stack = if message.is_empty() {
            kind.as_str().to_string()
        } else {
            format!("{}: {}", kind.as_str(), message)
        };
        for entry in self.call_stack.iter().rev() {
            stack.push_str(&format!(
                "\n    at {} ({}:{})",
                entry.name, entry.position.line, entry.position.column
            ));
        }
        stack.push_str("\n    at <script>");
        errors::error_object(kind, message, stack)
    }

    pub(crate) fn throw_error(&self, kind: ErrorKind, message: &str) -> RuntimeError {
        RuntimeError::Thrown(self.make_error(kind, message))
    }

    //=============================================
    //            Section 4: Statements
    //=============================================

    fn hoist_declarations(&self, statements: &[Stmt], env: &Env) {
        for statement in statements {
            match statement {
                Stmt::Function(decl) => {
                    if let Some(name) = &decl.name {
                        let closure = self.make_closure(decl, env, None);
                        Scope::declare(env, name, closure, true);
                    }
                }
                Stmt::VarDecl {
                    kind: DeclKind::Var,
                    declarations,
                    ..
                } => {
                    for declarator in declarations {
                        Scope::declare_var(env, &declarator.name, None);
                    }
                }
                _ => {}
            }
        }
    }

    fn execute_block(&mut self, statements: &[Stmt], env: &Env) -> EvalResult<Flow> {
        self.hoist_declarations(statements, env);
        for statement in statements {
            match self.execute(statement, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute(&mut self, statement: &Stmt, env: &Env) -> EvalResult<Flow> {
        match statement {
            Stmt::Empty | Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Expression { expr, .. } => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl {
                kind, declarations, ..
            } => {
                for declarator in declarations {
                    let value = match &declarator.init {
                        Some(init) => self.eval_named(init, env, &declarator.name)?,
                        None => Value::Undefined,
                    };
                    match kind {
                        DeclKind::Var => {
                            let value = declarator.init.as_ref().map(|_| value);
                            Scope::declare_var(env, &declarator.name, value);
                        }
                        DeclKind::Let => Scope::declare(env, &declarator.name, value, true),
                        DeclKind::Const => Scope::declare(env, &declarator.name, value, false),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval(condition, env)?.truthy() {
                    self.execute_scoped(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.execute_scoped(else_branch, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                while self.eval(condition, env)?.truthy() {
                    self.control.check()?;
                    match self.execute_scoped(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => self.execute_for(init.as_deref(), condition.as_ref(), update.as_ref(), body, env),
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                ..
            } => {
                let items = self.iterate(iterable, env)?;
                for item in items {
                    self.control.check()?;
                    let iteration = Scope::new_env(Some(Rc::clone(env)), false);
                    Scope::declare(&iteration, name, item, *kind != DeclKind::Const);
                    match self.execute_scoped(body, &iteration)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Throw { value, .. } => {
                let value = self.eval(value, env)?;
                Err(RuntimeError::Thrown(value))
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                let block_env = Scope::new_env(Some(Rc::clone(env)), false);
                let mut result = self.execute_block(block, &block_env);
                let caught = match (&result, handler) {
                    (Err(RuntimeError::Thrown(error)), Some(handler)) => {
                        Some((error.clone(), handler))
                    }
                    _ => None,
                };
                if let Some((error, handler)) = caught {
                    let catch_env = Scope::new_env(Some(Rc::clone(env)), false);
                    if let Some(param) = &handler.param {
                        Scope::declare(&catch_env, param, error, true);
                    }
                    result = self.execute_block(&handler.body, &catch_env);
                }
                if let Some(finalizer) = finalizer {
                    if result.as_ref().is_err_and(RuntimeError::is_abort) {
                        return result;
                    }
                    let finally_env = Scope::new_env(Some(Rc::clone(env)), false);
                    match self.execute_block(finalizer, &finally_env)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                result
            }
            Stmt::Block(statements) => {
                let block_env = Scope::new_env(Some(Rc::clone(env)), false);
                self.execute_block(statements, &block_env)
            }
            Stmt::Import {
                binding,
                module,
                position,
            } => {
                let value = self.require_module(module, Some(*position))?;
                Scope::declare(env, binding, value, false);
                Ok(Flow::Normal)
            }
        }
    }

    /// Bodies of `if`/loops get their own block scope unless they already are blocks.
    fn execute_scoped(&mut self, statement: &Stmt, env: &Env) -> EvalResult<Flow> {
        match statement {
            Stmt::Block(_) => self.execute(statement, env),
            other => {
                let scoped = Scope::new_env(Some(Rc::clone(env)), false);
                self.execute(other, &scoped)
            }
        }
    }

    fn execute_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Env,
    ) -> EvalResult<Flow> {
        let loop_env = Scope::new_env(Some(Rc::clone(env)), false);
        if let Some(init) = init {
            self.execute(init, &loop_env)?;
        }
        // Each iteration sees a fresh copy of the loop bindings so closures
        // capture the value of that iteration.
        let mut iteration = Scope::duplicate(&loop_env);
        loop {
            self.control.check()?;
            if let Some(condition) = condition {
                if !self.eval(condition, &iteration)?.truthy() {
                    break;
                }
            }
            match self.execute_scoped(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            iteration = Scope::duplicate(&iteration);
            if let Some(update) = update {
                self.eval(update, &iteration)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn iterate(&mut self, iterable: &Expr, env: &Env) -> EvalResult<Vec<Value>> {
        match self.eval(iterable, env)? {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(text) => Ok(text.chars().map(|c| Value::string(c.to_string())).collect()),
            other => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("{} is not iterable", other.to_js_string()),
            )),
        }
    }

    //=============================================
    //            Section 5: Expressions
    //=============================================

    /// Evaluates an initializer, naming anonymous functions after their binding.
    fn eval_named(&mut self, expr: &Expr, env: &Env, name: &str) -> EvalResult<Value> {
        match expr {
            Expr::Function(decl) if decl.name.is_none() => {
                Ok(self.make_closure(decl, env, Some(name)))
            }
            other => self.eval(other, env),
        }
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> EvalResult<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::string(s),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
                Literal::Undefined => Value::Undefined,
            }),
            Expr::Template { parts, .. } => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(chunk) => text.push_str(chunk),
                        TemplatePart::Expr(expr) => {
                            text.push_str(&self.eval(expr, env)?.to_js_string())
                        }
                    }
                }
                Ok(Value::string(text))
            }
            Expr::Identifier { name, .. } => Scope::lookup(env, name).ok_or_else(|| {
                self.throw_error(
                    ErrorKind::ReferenceError,
                    &format!("{} is not defined", name),
                )
            }),
            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element, env)?);
                }
                Ok(Value::array(items))
            }
            Expr::Object { properties, .. } => {
                let mut map = IndexMap::with_capacity(properties.len());
                for (key, value) in properties {
                    let value = self.eval_named(value, env, key)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Function(decl) => Ok(self.make_closure(decl, env, None)),
            Expr::Unary {
                operator, operand, ..
            } => {
                if *operator == UnaryOp::Typeof {
                    if let Expr::Identifier { name, .. } = operand.as_ref() {
                        let value = Scope::lookup(env, name).unwrap_or(Value::Undefined);
                        return Ok(Value::string(value.type_of()));
                    }
                }
                let value = self.eval(operand, env)?;
                Ok(match operator {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Negate => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Typeof => Value::string(value.type_of()),
                })
            }
            Expr::Update {
                increment,
                prefix,
                target,
                ..
            } => {
                let old = self.eval(target, env)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign_to(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(binary_op(*operator, &left, &right))
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.eval(left, env)?;
                let short_circuit = match operator {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Assign {
                target,
                operator,
                value,
                ..
            } => {
                let value = match operator {
                    None => match target.as_ref() {
                        Expr::Identifier { name, .. } => self.eval_named(value, env, name)?,
                        _ => self.eval(value, env)?,
                    },
                    Some(op) => {
                        let current = self.eval(target, env)?;
                        let rhs = self.eval(value, env)?;
                        binary_op(*op, &current, &rhs)
                    }
                };
                self.assign_to(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Call {
                callee,
                args,
                position,
            } => self.eval_call(callee, args, *position, env),
            Expr::New {
                callee,
                args,
                position,
            } => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.construct(&constructor, args, *position, callee)
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env)?;
                self.get_member(&object, property)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.get_index(&object, &index)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> EvalResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }
        Ok(values)
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        position: Position,
        env: &Env,
    ) -> EvalResult<Value> {
        if let Expr::Member {
            object, property, ..
        } = callee
        {
            let receiver = self.eval(object, env)?;
            let args = self.eval_args(args, env)?;
            return self.call_method(&receiver, property, args, position, callee);
        }
        let function = self.eval(callee, env)?;
        let args = self.eval_args(args, env)?;
        if !function.is_callable() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("{} is not a function", describe_expr(callee)),
            ));
        }
        self.call_value(&function, args, Some(position))
    }

    fn assign_to(&mut self, target: &Expr, value: Value, env: &Env) -> EvalResult<()> {
        match target {
            Expr::Identifier { name, .. } => match Scope::assign(env, name, value) {
                Ok(()) => Ok(()),
                Err(AssignError::Constant) => Err(self.throw_error(
                    ErrorKind::TypeError,
                    "Assignment to constant variable.",
                )),
                Err(AssignError::Undeclared) => Err(self.throw_error(
                    ErrorKind::ReferenceError,
                    &format!("{} is not defined", name),
                )),
            },
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env)?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                match (&object, &index) {
                    (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                        if *n >= MAX_ARRAY_LENGTH as f64 {
                            return Err(
                                self.throw_error(ErrorKind::RangeError, "Invalid array length")
                            );
                        }
                        let slot = *n as usize;
                        let mut items = items.borrow_mut();
                        if slot >= items.len() {
                            items.resize(slot + 1, Value::Undefined);
                        }
                        items[slot] = value;
                        Ok(())
                    }
                    _ => self.set_property(&object, &index.to_js_string(), value),
                }
            }
            _ => Err(self.throw_error(
                ErrorKind::SyntaxError,
                "Invalid left-hand side in assignment",
            )),
        }
    }

    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> EvalResult<()> {
        match object {
            Value::Object(map) => {
                map.borrow_mut().properties.insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) if key == "length" => {
                let length = value.to_number();
                if (0.0..=MAX_ARRAY_LENGTH as f64).contains(&length) && length.fract() == 0.0 {
                    items.borrow_mut().resize(length as usize, Value::Undefined);
                    Ok(())
                } else {
                    Err(self.throw_error(ErrorKind::RangeError, "Invalid array length"))
                }
            }
            Value::Undefined | Value::Null => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!(
                    "Cannot set properties of {} (setting '{}')",
                    object.to_js_string(),
                    key
                ),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn get_member(&mut self, object: &Value, name: &str) -> EvalResult<Value> {
        match object {
            Value::Object(map) => Ok(map.borrow().get(name)),
            Value::Array(items) => Ok(match name {
                "length" => Value::Number(items.borrow().len() as f64),
                _ => Value::Undefined,
            }),
            Value::String(text) => Ok(match name {
                "length" => Value::Number(text.encode_utf16().count() as f64),
                _ => Value::Undefined,
            }),
            Value::Native(native) => Ok(self.native_member(native, name)),
            Value::Function(closure) => Ok(match name {
                "name" => Value::string(&closure.name),
                "length" => Value::Number(closure.decl.params.len() as f64),
                _ => Value::Undefined,
            }),
            Value::Undefined | Value::Null => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_js_string(),
                    name
                ),
            )),
            Value::Bool(_) | Value::Number(_) | Value::Promise(_) => Ok(Value::Undefined),
        }
    }

    fn get_index(&mut self, object: &Value, index: &Value) -> EvalResult<Value> {
        match (object, index) {
            (Value::Array(items), Value::Number(n)) => {
                if *n >= 0.0 && n.fract() == 0.0 {
                    Ok(items.borrow().get(*n as usize).cloned().unwrap_or(Value::Undefined))
                } else {
                    Ok(Value::Undefined)
                }
            }
            (Value::String(text), Value::Number(n)) => Ok(if *n >= 0.0 && n.fract() == 0.0 {
                text.chars()
                    .nth(*n as usize)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }),
            _ => self.get_member(object, &index.to_js_string()),
        }
    }

    //=============================================
    //            Section 6: Calls
    //=============================================

    fn make_closure(&self, decl: &Rc<FunctionDecl>, env: &Env, name_hint: Option<&str>) -> Value {
        let name = decl
            .name
            .clone()
            .or_else(|| name_hint.map(str::to_string))
            .unwrap_or_default();
        Value::Function(Rc::new(value::Closure {
            decl: Rc::clone(decl),
            env: Rc::clone(env),
            name,
        }))
    }

    /// Calls any callable value. `site` is the call expression, used by natives
    /// that report where they were invoked from.
    pub(crate) fn call_value(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        site: Option<Position>,
    ) -> EvalResult<Value> {
        self.control.check()?;
        match function {
            Value::Function(closure) => {
                if self.call_stack.len() >= self.options.max_call_depth {
                    return Err(self.throw_error(
                        ErrorKind::RangeError,
                        "Maximum call stack size exceeded",
                    ));
                }
                let env = Scope::new_env(Some(Rc::clone(&closure.env)), true);
                let mut args = args.into_iter();
                for param in &closure.decl.params {
                    let mut value = args.next().unwrap_or(Value::Undefined);
                    if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                        value = self.eval(default, &env)?;
                    }
                    Scope::declare(&env, &param.name, value, true);
                }

                self.call_stack.push(StackEntry {
                    name: if closure.name.is_empty() {
                        "<anonymous>".to_string()
                    } else {
                        closure.name.clone()
                    },
                    position: closure.decl.position,
                });
                let result = match &closure.decl.body {
                    FunctionBody::Block(body) => match self.execute_block(body, &env) {
                        Ok(Flow::Return(value)) => Ok(value),
                        Ok(_) => Ok(Value::Undefined),
                        Err(error) => Err(error),
                    },
                    FunctionBody::Expr(expr) => self.eval(expr, &env),
                };
                self.call_stack.pop();
                result
            }
            Value::Native(native) => {
                let native = Rc::clone(native);
                self.call_builtin(&native, args, site)
            }
            other => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("{} is not a function", other.to_js_string()),
            )),
        }
    }

    fn construct(
        &mut self,
        constructor: &Value,
        args: Vec<Value>,
        position: Position,
        callee: &Expr,
    ) -> EvalResult<Value> {
        match constructor {
            Value::Native(native) => match &native.builtin {
                Builtin::PromiseConstructor => {
                    let executor = args.into_iter().next().unwrap_or(Value::Undefined);
                    self.construct_promise(&executor)
                }
                Builtin::ErrorConstructor(_) => {
                    let native = Rc::clone(native);
                    self.call_builtin(&native, args, Some(position))
                }
                _ => Err(self.throw_error(
                    ErrorKind::TypeError,
                    &format!("{} is not a constructor", describe_expr(callee)),
                )),
            },
            _ => Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("{} is not a constructor", describe_expr(callee)),
            )),
        }
    }

    fn payload_value(&self, payload: IoPayload) -> Value {
        match payload {
            IoPayload::Text(text) => Value::string(text),
            IoPayload::Response { url, status, body } => builtins::response_object(&url, status, &body),
        }
    }
}

/// Source-like rendering of a callee for error messages.
fn describe_expr(expr: &Expr) -> String {
    match expr {
        Expr::Identifier { name, .. } => name.clone(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", describe_expr(object), property),
        Expr::Index { object, .. } => format!("{}[...]", describe_expr(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe_expr(callee)),
        _ => "expression".to_string(),
    }
}

fn binary_op(operator: BinaryOp, left: &Value, right: &Value) -> Value {
    match operator {
        BinaryOp::Add => {
            let numeric = |v: &Value| {
                matches!(
                    v,
                    Value::Number(_) | Value::Bool(_) | Value::Null | Value::Undefined
                )
            };
            if numeric(left) && numeric(right) {
                Value::Number(left.to_number() + right.to_number())
            } else {
                Value::string(format!("{}{}", left.to_js_string(), right.to_js_string()))
            }
        }
        BinaryOp::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Modulo => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Equal => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEqual => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEqual => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let result = match ordering {
                None => false,
                Some(ordering) => match operator {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::Greater => ordering.is_gt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    _ => ordering.is_ge(),
                },
            };
            Value::Bool(result)
        }
    }
}

//=============================================/*
//  Statements return a Flow so return/break/continue unwind without
//  exceptions; thrown script values and host aborts travel as RuntimeError.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_concatenates_when_either_side_is_a_string() {
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::string("a"), &Value::Number(1.0)).to_js_string(),
            "a1"
        );
        assert_eq!(
            binary_op(BinaryOp::Add, &Value::Number(2.0), &Value::Bool(true)).to_number(),
            3.0
        );
    }

    #[test]
    fn comparisons_with_nan_are_false() {
        let nan = Value::Number(f64::NAN);
        assert!(!binary_op(BinaryOp::Less, &nan, &Value::Number(1.0)).truthy());
        assert!(!binary_op(BinaryOp::GreaterEqual, &nan, &Value::Number(1.0)).truthy());
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        assert!(binary_op(BinaryOp::Less, &Value::string("a"), &Value::string("b")).truthy());
    }

    #[test]
    fn callee_descriptions_read_like_source() {
        let position = Position::new(1, 1, 0);
        let expr = Expr::Member {
            object: Box::new(Expr::Identifier {
                name: "console".into(),
                position,
            }),
            property: "lg".into(),
            position,
        };
        assert_eq!(describe_expr(&expr), "console.lg");
    }
}
