//=====================================================
// File: interpreter/promise.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Promise state machine
// Objective: Settle promises, adopt thenables and hand every reaction to the
//            scheduler as a promise-queue microtask
//=====================================================

//=============================================
//            Section 1: Promise Cells
//=============================================

use super::builtins::Builtin;
use super::errors::{ErrorKind, RuntimeError};
use super::value::Value;
use super::{callback_source, Callback, Interpreter, Job};
use crate::harness::Scheduler;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type PromiseRef = Rc<RefCell<PromiseCell>>;

#[derive(Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

pub struct PromiseCell {
    pub state: PromiseState,
    reactions: Vec<Reaction>,
    /// Set once any reaction is attached; unhandled rejections are reported otherwise.
    pub handled: bool,
}

pub fn new_promise() -> PromiseRef {
    Rc::new(RefCell::new(PromiseCell {
        state: PromiseState::Pending,
        reactions: Vec::new(),
        handled: false,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Then,
    Catch,
    Finally,
}

impl ReactionKind {
    pub fn label(self) -> &'static str {
        match self {
            ReactionKind::Then => "Promise.then callback",
            ReactionKind::Catch => "Promise.catch callback",
            ReactionKind::Finally => "Promise.finally callback",
        }
    }
}

#[derive(Clone)]
pub struct Reaction {
    pub kind: ReactionKind,
    pub on_fulfilled: Value,
    pub on_rejected: Value,
    pub derived: PromiseRef,
}

impl Reaction {
    fn handler_for(&self, outcome: &Result<Value, Value>) -> &Value {
        match (self.kind, outcome) {
            (ReactionKind::Finally, _) | (_, Ok(_)) => &self.on_fulfilled,
            (_, Err(_)) => &self.on_rejected,
        }
    }
}

//=============================================
//            Section 2: Settlement
//=============================================

impl<S: Scheduler> Interpreter<S> {
    /// Resolves `promise` with `value`, adopting promises and thenables.
    pub(super) fn resolve_promise(
        &mut self,
        promise: &PromiseRef,
        value: Value,
    ) -> Result<(), RuntimeError> {
        if !matches!(promise.borrow().state, PromiseState::Pending) {
            return Ok(());
        }
        match &value {
            Value::Promise(inner) if Rc::ptr_eq(inner, promise) => {
                let error = self.make_error(
                    ErrorKind::TypeError,
                    "Chaining cycle detected for promise #<Promise>",
                );
                self.reject_promise(promise, error)
            }
            Value::Promise(_) => self.queue_thenable(promise, value.clone(), None),
            Value::Object(object) => {
                let then = object.borrow().get("then");
                if then.is_callable() {
                    self.queue_thenable(promise, value.clone(), Some(then))
                } else {
                    self.settle(promise, PromiseState::Fulfilled(value))
                }
            }
            _ => self.settle(promise, PromiseState::Fulfilled(value)),
        }
    }

    pub(super) fn reject_promise(
        &mut self,
        promise: &PromiseRef,
        reason: Value,
    ) -> Result<(), RuntimeError> {
        if !matches!(promise.borrow().state, PromiseState::Pending) {
            return Ok(());
        }
        self.settle(promise, PromiseState::Rejected(reason))
    }

    fn settle(&mut self, promise: &PromiseRef, state: PromiseState) -> Result<(), RuntimeError> {
        let (reactions, unhandled) = {
            let mut cell = promise.borrow_mut();
            cell.state = state;
            let unhandled = matches!(cell.state, PromiseState::Rejected(_)) && !cell.handled;
            (std::mem::take(&mut cell.reactions), unhandled)
        };
        if unhandled {
            self.unhandled.push(Rc::clone(promise));
        }
        let outcome = match &promise.borrow().state {
            PromiseState::Fulfilled(value) => Ok(value.clone()),
            PromiseState::Rejected(reason) => Err(reason.clone()),
            PromiseState::Pending => return Ok(()),
        };
        for reaction in reactions {
            self.queue_reaction(reaction, outcome.clone())?;
        }
        Ok(())
    }

    fn queue_reaction(
        &mut self,
        reaction: Reaction,
        outcome: Result<Value, Value>,
    ) -> Result<(), RuntimeError> {
        let label = reaction.kind.label();
        let source = callback_source(reaction.handler_for(&outcome));
        self.scheduler.queue_microtask(
            Callback {
                job: Job::Reaction { reaction, outcome },
                source,
            },
            label,
        )
    }

    fn queue_thenable(
        &mut self,
        promise: &PromiseRef,
        thenable: Value,
        then: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let source = then.as_ref().and_then(callback_source);
        self.scheduler.queue_microtask(
            Callback {
                job: Job::ResolveThenable {
                    promise: Rc::clone(promise),
                    thenable,
                    then,
                },
                source,
            },
            "Promise resolve thenable",
        )
    }

    //=============================================
    //            Section 3: Reactions
    //=============================================

    /// Attaches a reaction and returns the derived promise.
    pub(super) fn promise_then(
        &mut self,
        promise: &PromiseRef,
        kind: ReactionKind,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> Result<Value, RuntimeError> {
        let derived = new_promise();
        let reaction = Reaction {
            kind,
            on_fulfilled,
            on_rejected,
            derived: Rc::clone(&derived),
        };
        let settled = {
            let mut cell = promise.borrow_mut();
            cell.handled = true;
            match &cell.state {
                PromiseState::Pending => {
                    cell.reactions.push(reaction.clone());
                    None
                }
                PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
                PromiseState::Rejected(reason) => Some(Err(reason.clone())),
            }
        };
        if let Some(outcome) = settled {
            self.queue_reaction(reaction, outcome)?;
        }
        Ok(Value::Promise(derived))
    }

    pub(super) fn run_reaction(
        &mut self,
        reaction: Reaction,
        outcome: Result<Value, Value>,
    ) -> Result<(), RuntimeError> {
        let handler = reaction.handler_for(&outcome).clone();
        if !handler.is_callable() {
            return match outcome {
                Ok(value) => self.resolve_promise(&reaction.derived, value),
                Err(reason) => self.reject_promise(&reaction.derived, reason),
            };
        }

        let args = match (&outcome, reaction.kind) {
            (_, ReactionKind::Finally) => Vec::new(),
            (Ok(value), _) | (Err(value), _) => vec![value.clone()],
        };
        match self.call_value(&handler, args, None) {
            // `finally` passes the original outcome through unless it throws.
            Ok(_) if reaction.kind == ReactionKind::Finally => match outcome {
                Ok(value) => self.resolve_promise(&reaction.derived, value),
                Err(reason) => self.reject_promise(&reaction.derived, reason),
            },
            Ok(result) => self.resolve_promise(&reaction.derived, result),
            Err(RuntimeError::Thrown(error)) => self.reject_promise(&reaction.derived, error),
            Err(abort) => Err(abort),
        }
    }

    pub(super) fn run_resolve_thenable(
        &mut self,
        promise: PromiseRef,
        thenable: Value,
        then: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let (resolve, reject, already) = resolving_functions(&promise);
        match (then, &thenable) {
            (None, Value::Promise(inner)) => {
                self.promise_then(inner, ReactionKind::Then, resolve, reject)?;
                Ok(())
            }
            (Some(then), _) => match self.call_value(&then, vec![resolve, reject], None) {
                Ok(_) => Ok(()),
                Err(RuntimeError::Thrown(error)) => {
                    if already.replace(true) {
                        Ok(())
                    } else {
                        self.reject_promise(&promise, error)
                    }
                }
                Err(abort) => Err(abort),
            },
            (None, _) => self.settle(&promise, PromiseState::Fulfilled(thenable)),
        }
    }

    /// `new Promise(executor)`.
    pub(super) fn construct_promise(&mut self, executor: &Value) -> Result<Value, RuntimeError> {
        if !executor.is_callable() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("Promise resolver {} is not a function", executor.to_js_string()),
            ));
        }
        let promise = new_promise();
        let (resolve, reject, already) = resolving_functions(&promise);
        match self.call_value(executor, vec![resolve, reject], None) {
            Ok(_) => {}
            Err(RuntimeError::Thrown(error)) => {
                if !already.replace(true) {
                    self.reject_promise(&promise, error)?;
                }
            }
            Err(abort) => return Err(abort),
        }
        Ok(Value::Promise(promise))
    }

    pub(super) fn promise_resolved(&mut self, value: Value) -> Result<Value, RuntimeError> {
        if let Value::Promise(_) = value {
            return Ok(value);
        }
        let promise = new_promise();
        self.resolve_promise(&promise, value)?;
        Ok(Value::Promise(promise))
    }

    pub(super) fn promise_rejected(&mut self, reason: Value) -> Result<Value, RuntimeError> {
        let promise = new_promise();
        self.reject_promise(&promise, reason)?;
        Ok(Value::Promise(promise))
    }

    /// The first rejection that is still unhandled once microtasks drained.
    pub fn take_unhandled_rejection(&mut self) -> Option<Value> {
        let pending = std::mem::take(&mut self.unhandled);
        pending.into_iter().find_map(|promise| {
            let cell = promise.borrow();
            match &cell.state {
                PromiseState::Rejected(reason) if !cell.handled => Some(reason.clone()),
                _ => None,
            }
        })
    }
}

/// One-shot resolve/reject pair sharing an "already resolved" flag.
fn resolving_functions(promise: &PromiseRef) -> (Value, Value, Rc<Cell<bool>>) {
    let already = Rc::new(Cell::new(false));
    let resolve = Value::native(
        "resolve",
        Builtin::ResolveFunction {
            promise: Rc::clone(promise),
            already: Rc::clone(&already),
        },
    );
    let reject = Value::native(
        "reject",
        Builtin::RejectFunction {
            promise: Rc::clone(promise),
            already: Rc::clone(&already),
        },
    );
    (resolve, reject, already)
}
