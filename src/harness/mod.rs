//=====================================================
// File: harness/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Instrumentation harness
// Objective: Run one script against the host loop and report every
//            scheduling step it performs, in order, as bounded events
//=====================================================

//=============================================
//            Section 1: Imports & Submodules
//=============================================

pub mod controller;
pub mod scheduler;
pub mod sink;

pub use controller::{Controller, HarnessError, RunHandle, RunRequest};
pub use scheduler::{Instrumented, Scheduler};
pub use sink::{EventCollector, EventHook, EventSink};

use crate::ast::Program;
use crate::event::{CheckpointScope, Diagnostic, Event, RequestStatus};
use crate::interpreter::{
    describe_thrown, source_of, Interpreter, InterpreterOptions, RuntimeError, Value,
};
use crate::parser;
use crate::runtime::{
    AbortReason, ClockMode, EventLoop, IdGenerator, IoDriver, RunControl, Step,
};
use scheduler::{Entry, Work};
use std::time::Duration;

//=============================================
//            Section 2: Options & Outcomes
//=============================================

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub max_events: usize,
    pub timeout: Duration,
    pub max_call_depth: usize,
    pub clock: ClockMode,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            timeout: Duration::from_millis(5_000),
            max_call_depth: InterpreterOptions::default().max_call_depth,
            clock: ClockMode::Virtual,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    SyntaxError,
    UncaughtError,
    TimedOut,
    Cancelled,
    EventLimit,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Termination::Completed => "completed",
            Termination::SyntaxError => "syntax_error",
            Termination::UncaughtError => "uncaught_error",
            Termination::TimedOut => "timed_out",
            Termination::Cancelled => "cancelled",
            Termination::EventLimit => "event_limit",
        }
    }

    fn from_abort(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Timeout { .. } => Termination::TimedOut,
            AbortReason::Cancelled => Termination::Cancelled,
            AbortReason::EventLimit => Termination::EventLimit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub termination: Termination,
    pub events_emitted: usize,
}

/// Why the loop stopped early.
enum Failure {
    Error(RuntimeError),
    /// A rejected promise nobody handled by the end of a microtask drain.
    Rejection(Value),
}

impl From<RuntimeError> for Failure {
    fn from(error: RuntimeError) -> Self {
        Failure::Error(error)
    }
}

impl From<AbortReason> for Failure {
    fn from(reason: AbortReason) -> Self {
        Failure::Error(RuntimeError::Abort(reason))
    }
}

impl Failure {
    fn describe(self, interpreter: &Interpreter<Instrumented>) -> (Termination, String, Option<String>) {
        match self {
            Failure::Error(RuntimeError::Abort(reason)) => {
                (Termination::from_abort(reason), reason.to_string(), None)
            }
            Failure::Error(error) => {
                let (message, stack) = interpreter.describe_error(&error);
                (Termination::UncaughtError, message, stack)
            }
            Failure::Rejection(reason) => {
                let (message, stack) = describe_thrown(&reason);
                let detail = message.strip_prefix("Uncaught ").unwrap_or(&message);
                (
                    Termination::UncaughtError,
                    format!("Uncaught (in promise) {}", detail),
                    stack,
                )
            }
        }
    }
}

//=============================================
//            Section 3: Harness
//=============================================

/// Runs scripts one at a time; each run gets a fresh loop and interpreter.
pub struct Harness {
    options: HarnessOptions,
    io: Box<dyn IoDriver>,
    ids: IdGenerator,
}

impl Harness {
    pub fn new(options: HarnessOptions, io: Box<dyn IoDriver>) -> Self {
        Self {
            options,
            io,
            ids: IdGenerator::new(),
        }
    }

    /// Seeds the id generator every run starts from.
    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// A fresh control carrying this harness's configured timeout.
    pub fn control(&self) -> RunControl {
        RunControl::new(self.options.timeout)
    }

    /// Executes `code`, pushing every event into `hook`.
    ///
    /// The stream always ends with `SCRIPT_END`, except when the event cap was
    /// hit: then the cap's `RUNTIME_ERROR` is the final record.
    pub fn run(&mut self, code: &str, control: &RunControl, hook: EventHook) -> RunOutcome {
        let sink = EventSink::new(self.options.max_events, hook);
        let event_loop =
            EventLoop::new(self.options.clock.build()).with_interrupt(control.cancel_flag());
        let mut scheduler = Instrumented::new(sink, event_loop, self.ids.clone());
        let budget_end = scheduler.now().saturating_add(control.timeout_ms());

        if scheduler.script_start().is_err() {
            return self.finish(scheduler, Termination::EventLimit);
        }

        let program = match parser::parse(code) {
            Ok(program) => program,
            Err(error) => {
                tracing::debug!(%error, "script rejected with a syntax error");
                let range = source_of(error.position());
                let diagnostic = Diagnostic {
                    message: error.message(),
                    line: range.line,
                    col: range.col,
                };
                let termination = match scheduler.diagnostics(vec![diagnostic]) {
                    Ok(()) => Termination::SyntaxError,
                    Err(_) => Termination::EventLimit,
                };
                scheduler.fail(error.to_string(), None);
                return self.finish(scheduler, termination);
            }
        };

        let options = InterpreterOptions {
            max_call_depth: self.options.max_call_depth,
        };
        let mut interpreter = Interpreter::new(scheduler, control.clone(), options);
        let termination = match self.execute(&mut interpreter, &program, control, budget_end) {
            Ok(()) => Termination::Completed,
            Err(failure) => {
                let (termination, message, stack) = failure.describe(&interpreter);
                interpreter.scheduler_mut().fail(message, stack);
                termination
            }
        };
        self.finish(interpreter.into_scheduler(), termination)
    }

    /// Convenience for tests and the CLI: runs `code` and returns the whole trace.
    pub fn run_to_vec(&mut self, code: &str, control: &RunControl) -> (RunOutcome, Vec<Event>) {
        let collector = EventCollector::new();
        let outcome = self.run(code, control, collector.hook());
        (outcome, collector.take())
    }

    fn finish(&self, mut scheduler: Instrumented, termination: Termination) -> RunOutcome {
        scheduler.script_end();
        let outcome = RunOutcome {
            termination,
            events_emitted: scheduler.emitted(),
        };
        tracing::info!(
            termination = termination.as_str(),
            events = outcome.events_emitted,
            "harness run finished"
        );
        outcome
    }

    fn execute(
        &mut self,
        interpreter: &mut Interpreter<Instrumented>,
        program: &Program,
        control: &RunControl,
        budget_end: u64,
    ) -> Result<(), Failure> {
        interpreter.run_program(program)?;
        interpreter
            .scheduler_mut()
            .checkpoint(CheckpointScope::ScriptEnd, "Main script finished".to_string())?;
        self.drive(interpreter, control, budget_end)
    }

    //=============================================
    //            Section 4: Loop Driver
    //=============================================

    /// Pulls steps from the host loop until it goes idle, reporting each one.
    fn drive(
        &mut self,
        interpreter: &mut Interpreter<Instrumented>,
        control: &RunControl,
        budget_end: u64,
    ) -> Result<(), Failure> {
        let timed_out = AbortReason::Timeout {
            timeout_ms: control.timeout_ms(),
        };
        loop {
            control.check()?;
            let step = interpreter.scheduler_mut().next_step();
            if !matches!(step, Step::Microtask { .. }) {
                interpreter.scheduler_mut().close_drain()?;
                if let Some(reason) = interpreter.take_unhandled_rejection() {
                    return Err(Failure::Rejection(reason));
                }
            }

            match step {
                Step::Microtask { queue, payload } => {
                    let Entry { work, meta } = payload;
                    interpreter.scheduler_mut().begin_microtask(queue, &meta)?;
                    let job = self.job_for(interpreter, work)?;
                    interpreter.invoke(job)?;
                    interpreter.scheduler_mut().finish_callback(&meta)?;
                }
                Step::Task {
                    phase,
                    key,
                    payload,
                } => {
                    let Entry { work, mut meta } = payload;
                    let job = self.job_for(interpreter, work)?;
                    let scheduler = interpreter.scheduler_mut();
                    scheduler.fire_task(phase, &mut meta)?;
                    scheduler.begin_task(phase, &meta)?;
                    interpreter.invoke(job)?;
                    interpreter.scheduler_mut().finish_task(key, &meta)?;
                }
                Step::PhaseExit(phase) => interpreter.scheduler_mut().phase_exit(phase)?,
                Step::PollWaitStart {
                    timeout_ms,
                    deadline_ms,
                } => {
                    if deadline_ms > budget_end {
                        return Err(timed_out.into());
                    }
                    interpreter
                        .scheduler_mut()
                        .poll_wait_start(timeout_ms, "Waiting for timers")?;
                }
                Step::PollWaitEnd => interpreter.scheduler_mut().poll_wait_end("Timer due")?,
                Step::Blocked => {
                    let scheduler = interpreter.scheduler_mut();
                    let remaining = budget_end.saturating_sub(scheduler.now());
                    scheduler.poll_wait_start(remaining, "Waiting for socket activity")?;
                    scheduler.park_until(budget_end);
                    control.check()?;
                    return Err(timed_out.into());
                }
                Step::Idle => return Ok(()),
            }
        }
    }

    /// Request entries perform their I/O here, at poll time, and report its end.
    fn job_for(
        &mut self,
        interpreter: &mut Interpreter<Instrumented>,
        work: Work,
    ) -> Result<crate::interpreter::Job, RuntimeError> {
        match work {
            Work::Job(job) => Ok(job),
            Work::Io {
                request,
                completion,
                request_id,
            } => {
                let result = self.io.perform(&request);
                let status = match &result {
                    Ok(_) => RequestStatus::Ok,
                    Err(failure) => {
                        tracing::debug!(request = %request.describe(), %failure, "request failed");
                        RequestStatus::Error
                    }
                };
                interpreter
                    .scheduler_mut()
                    .end_request(&request_id, status)?;
                Ok(interpreter.complete_io(completion, result))
            }
        }
    }
}

//=============================================/*
//  The harness never re-throws: every failure, including the event cap,
//  becomes events, and the returned RunOutcome says which way the run ended.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SandboxIo;

    fn run(code: &str) -> (RunOutcome, Vec<Event>) {
        let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
        let control = harness.control();
        harness.run_to_vec(code, &control)
    }

    fn tags(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(Event::tag).collect()
    }

    #[test]
    fn empty_script_is_bracketed() {
        let (outcome, events) = run("");
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(
            tags(&events),
            ["SCRIPT_START", "MICROTASK_CHECKPOINT", "SCRIPT_END"]
        );
    }

    #[test]
    fn syntax_errors_emit_a_diagnostic_and_a_bracketed_error() {
        let (outcome, events) = run("let = ;");
        assert_eq!(outcome.termination, Termination::SyntaxError);
        assert_eq!(
            tags(&events),
            [
                "SCRIPT_START",
                "TS_DIAGNOSTIC",
                "CALLBACK_START",
                "RUNTIME_ERROR",
                "CALLBACK_END",
                "SCRIPT_END"
            ]
        );
    }

    #[test]
    fn uncaught_errors_still_end_the_script() {
        let (outcome, events) = run("throw new Error('boom');");
        assert_eq!(outcome.termination, Termination::UncaughtError);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::RuntimeError { message, .. } if message == "boom"
        )));
        assert!(events.last().is_some_and(Event::is_script_end));
    }

    #[test]
    fn unhandled_rejections_fail_the_run() {
        let (outcome, events) = run("Promise.reject(new Error('nope'));");
        assert_eq!(outcome.termination, Termination::UncaughtError);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::RuntimeError { message, .. } if message == "Uncaught (in promise) nope"
        )));
    }

    #[test]
    fn open_server_times_out_and_closes_its_handle() {
        let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
        let (outcome, events) = harness.run_to_vec(
            "const net = require('net'); net.createServer().listen(0);",
            &RunControl::new(Duration::from_millis(50)),
        );
        assert_eq!(outcome.termination, Termination::TimedOut);
        let tags = tags(&events);
        assert!(tags.contains(&"HANDLE_OPEN"));
        assert!(tags.contains(&"HANDLE_CLOSE"));
        assert_eq!(tags.last(), Some(&"SCRIPT_END"));
    }
}
