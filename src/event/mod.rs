//=====================================================
// File: event/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Loopscope event vocabulary
// Objective: Define the closed, tagged set of event records shared by the
//            harness, the reducer, and the synthetic stepper
//=====================================================

//=============================================
//            Section 1: Imports & Submodules
//=============================================

pub mod codec;
pub mod command;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::num::NonZeroU32;

pub use codec::{
    encode_event, parse_event, parse_events, write_events, EventDecoder, ProtocolError,
};
pub use command::{parse_client_command, ClientCommand, Language, RunCodePayload};

//=============================================
//            Section 2: Enumerations
//=============================================

/// One of the five macrotask phases, visited in fixed order each loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Timers,
    Pending,
    Poll,
    Check,
    Close,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Timers,
        Phase::Pending,
        Phase::Poll,
        Phase::Check,
        Phase::Close,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Timers => "timers",
            Phase::Pending => "pending",
            Phase::Poll => "poll",
            Phase::Check => "check",
            Phase::Close => "close",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task queue names accepted on the wire. `Io` is the legacy spelling of `Poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskQueue {
    Timers,
    Pending,
    Poll,
    Io,
    Check,
    Close,
}

impl TaskQueue {
    /// Maps the legacy `io` name onto `poll`; every other queue names its own phase.
    pub fn canonical(self) -> Phase {
        match self {
            TaskQueue::Timers => Phase::Timers,
            TaskQueue::Pending => Phase::Pending,
            TaskQueue::Poll | TaskQueue::Io => Phase::Poll,
            TaskQueue::Check => Phase::Check,
            TaskQueue::Close => Phase::Close,
        }
    }
}

impl From<Phase> for TaskQueue {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Timers => TaskQueue::Timers,
            Phase::Pending => TaskQueue::Pending,
            Phase::Poll => TaskQueue::Poll,
            Phase::Check => TaskQueue::Check,
            Phase::Close => TaskQueue::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MicrotaskQueue {
    NextTick,
    Promise,
}

impl MicrotaskQueue {
    /// Drain priority: `nextTick` strictly before `promise`.
    pub const ORDER: [MicrotaskQueue; 2] = [MicrotaskQueue::NextTick, MicrotaskQueue::Promise];

    pub fn as_str(self) -> &'static str {
        match self {
            MicrotaskQueue::NextTick => "nextTick",
            MicrotaskQueue::Promise => "promise",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleKind {
    Timer,
    Interval,
    Immediate,
    Io,
    Socket,
    Fs,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Fs,
    Network,
    Dns,
    Crypto,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Ok,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointScope {
    AfterCallback,
    PhaseTransition,
    ScriptEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Timer,
    Io,
    Immediate,
    Other,
}

/// Which visual region currently holds the viewer's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusBox {
    #[serde(rename = "CODE")]
    Code,
    #[serde(rename = "STACK")]
    Stack,
    #[serde(rename = "WEBAPI")]
    WebApi,
    #[serde(rename = "TIMER_HEAP")]
    TimerHeap,
    #[serde(rename = "TASKQ")]
    TaskQueue,
    #[serde(rename = "MICROQ")]
    MicrotaskQueue,
    #[serde(rename = "CONSOLE")]
    Console,
    #[serde(rename = "IDLE")]
    Idle,
}

//=============================================
//            Section 3: Payload Records
//=============================================

/// A 1-based source location. Zero and negative positions are rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceRange {
    pub line: NonZeroU32,
    pub col: NonZeroU32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<NonZeroU32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_col: Option<NonZeroU32>,
}

impl SourceRange {
    /// Builds a point range, clamping zero coordinates up to 1.
    pub fn new(line: u32, col: u32) -> Self {
        Self {
            line: clamp_positive(line),
            col: clamp_positive(col),
            end_line: None,
            end_col: None,
        }
    }

    pub fn with_end(mut self, line: u32, col: u32) -> Self {
        self.end_line = Some(clamp_positive(line));
        self.end_col = Some(clamp_positive(col));
        self
    }
}

fn clamp_positive(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecutionFocus {
    pub active_box: FocusBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_range: Option<SourceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Default for ExecutionFocus {
    fn default() -> Self {
        Self {
            active_box: FocusBox::Idle,
            active_token_id: None,
            active_range: None,
            reason: None,
        }
    }
}

impl ExecutionFocus {
    /// Field-by-field merge; absent patch fields keep their current value.
    pub fn merge(&mut self, patch: &FocusPatch) {
        if let Some(active_box) = patch.active_box {
            self.active_box = active_box;
        }
        if let Some(token) = &patch.active_token_id {
            self.active_token_id = Some(token.clone());
        }
        if let Some(range) = patch.active_range {
            self.active_range = Some(range);
        }
        if let Some(reason) = &patch.reason {
            self.reason = Some(reason.clone());
        }
    }
}

/// Partial focus carried by `FOCUS_SET`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FocusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_box: Option<FocusBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_range: Option<SourceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Diagnostic {
    pub message: String,
    pub line: NonZeroU32,
    pub col: NonZeroU32,
}

//=============================================
//            Section 4: Event Records
//=============================================

/// Every scheduling step the harness can observe, as a closed tagged union.
///
/// On the wire each record is a JSON object whose `type` field carries the
/// SCREAMING_SNAKE tag and whose remaining keys are camelCase. Records with
/// unknown tags or unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum Event {
    ScriptStart {
        ts: f64,
    },
    ScriptEnd {
        ts: f64,
    },
    WebapiSchedule {
        ts: f64,
        #[serde(default, skip_serializing_if = "JsonValue::is_null")]
        job: JsonValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ScheduleKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    HandleOpen {
        ts: f64,
        id: String,
        kind: HandleKind,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    HandleClose {
        ts: f64,
        id: String,
    },
    RequestStart {
        ts: f64,
        id: String,
        kind: RequestKind,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    RequestEnd {
        ts: f64,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<RequestStatus>,
    },
    TimerHeapSchedule {
        ts: f64,
        timer_id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_ms: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<JsonValue>,
    },
    TimerHeapReady {
        ts: f64,
        timer_id: String,
        task_id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<JsonValue>,
    },
    PhaseEnter {
        ts: f64,
        phase: Phase,
    },
    PhaseExit {
        ts: f64,
        phase: Phase,
    },
    PollWaitStart {
        ts: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PollWaitEnd {
        ts: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    EnqueueTask {
        ts: f64,
        queue: TaskQueue,
        task_id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<JsonValue>,
    },
    DequeueTask {
        ts: f64,
        queue: TaskQueue,
        task_id: String,
    },
    CallbackStart {
        ts: f64,
        task_id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    CallbackEnd {
        ts: f64,
        task_id: String,
    },
    EnqueueMicrotask {
        ts: f64,
        queue: MicrotaskQueue,
        id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    DequeueMicrotask {
        ts: f64,
        queue: MicrotaskQueue,
        id: String,
    },
    DrainMicrotasksStart {
        ts: f64,
    },
    DrainMicrotasksEnd {
        ts: f64,
    },
    MicrotaskCheckpoint {
        ts: f64,
        scope: CheckpointScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Console {
        ts: f64,
        level: ConsoleLevel,
        args: Vec<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    RuntimeError {
        ts: f64,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    EnterFunction {
        ts: f64,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<SourceRange>,
    },
    ExitFunction {
        ts: f64,
        name: String,
    },
    TsDiagnostic {
        ts: f64,
        diagnostics: Vec<Diagnostic>,
    },
    FocusSet {
        ts: f64,
        focus: FocusPatch,
    },
}

impl Event {
    pub fn ts(&self) -> f64 {
        match self {
            Event::ScriptStart { ts }
            | Event::ScriptEnd { ts }
            | Event::WebapiSchedule { ts, .. }
            | Event::HandleOpen { ts, .. }
            | Event::HandleClose { ts, .. }
            | Event::RequestStart { ts, .. }
            | Event::RequestEnd { ts, .. }
            | Event::TimerHeapSchedule { ts, .. }
            | Event::TimerHeapReady { ts, .. }
            | Event::PhaseEnter { ts, .. }
            | Event::PhaseExit { ts, .. }
            | Event::PollWaitStart { ts, .. }
            | Event::PollWaitEnd { ts, .. }
            | Event::EnqueueTask { ts, .. }
            | Event::DequeueTask { ts, .. }
            | Event::CallbackStart { ts, .. }
            | Event::CallbackEnd { ts, .. }
            | Event::EnqueueMicrotask { ts, .. }
            | Event::DequeueMicrotask { ts, .. }
            | Event::DrainMicrotasksStart { ts }
            | Event::DrainMicrotasksEnd { ts }
            | Event::MicrotaskCheckpoint { ts, .. }
            | Event::Console { ts, .. }
            | Event::RuntimeError { ts, .. }
            | Event::EnterFunction { ts, .. }
            | Event::ExitFunction { ts, .. }
            | Event::TsDiagnostic { ts, .. }
            | Event::FocusSet { ts, .. } => *ts,
        }
    }

    /// The wire tag, e.g. `"ENQUEUE_TASK"`.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::ScriptStart { .. } => "SCRIPT_START",
            Event::ScriptEnd { .. } => "SCRIPT_END",
            Event::WebapiSchedule { .. } => "WEBAPI_SCHEDULE",
            Event::HandleOpen { .. } => "HANDLE_OPEN",
            Event::HandleClose { .. } => "HANDLE_CLOSE",
            Event::RequestStart { .. } => "REQUEST_START",
            Event::RequestEnd { .. } => "REQUEST_END",
            Event::TimerHeapSchedule { .. } => "TIMER_HEAP_SCHEDULE",
            Event::TimerHeapReady { .. } => "TIMER_HEAP_READY",
            Event::PhaseEnter { .. } => "PHASE_ENTER",
            Event::PhaseExit { .. } => "PHASE_EXIT",
            Event::PollWaitStart { .. } => "POLL_WAIT_START",
            Event::PollWaitEnd { .. } => "POLL_WAIT_END",
            Event::EnqueueTask { .. } => "ENQUEUE_TASK",
            Event::DequeueTask { .. } => "DEQUEUE_TASK",
            Event::CallbackStart { .. } => "CALLBACK_START",
            Event::CallbackEnd { .. } => "CALLBACK_END",
            Event::EnqueueMicrotask { .. } => "ENQUEUE_MICROTASK",
            Event::DequeueMicrotask { .. } => "DEQUEUE_MICROTASK",
            Event::DrainMicrotasksStart { .. } => "DRAIN_MICROTASKS_START",
            Event::DrainMicrotasksEnd { .. } => "DRAIN_MICROTASKS_END",
            Event::MicrotaskCheckpoint { .. } => "MICROTASK_CHECKPOINT",
            Event::Console { .. } => "CONSOLE",
            Event::RuntimeError { .. } => "RUNTIME_ERROR",
            Event::EnterFunction { .. } => "ENTER_FUNCTION",
            Event::ExitFunction { .. } => "EXIT_FUNCTION",
            Event::TsDiagnostic { .. } => "TS_DIAGNOSTIC",
            Event::FocusSet { .. } => "FOCUS_SET",
        }
    }

    pub fn is_script_end(&self) -> bool {
        matches!(self, Event::ScriptEnd { .. })
    }

    /// Range checks that the type system alone does not express.
    pub(crate) fn check_ranges(&self) -> Result<(), String> {
        if !self.ts().is_finite() {
            return Err(format!("{} carries a non-finite ts", self.tag()));
        }
        if let Event::TimerHeapSchedule {
            due_in_ms: Some(due),
            ..
        } = self
        {
            if !due.is_finite() || *due < 0.0 {
                return Err(format!("TIMER_HEAP_SCHEDULE dueInMs must be >= 0, got {due}"));
            }
        }
        Ok(())
    }
}

//=============================================/*
//  Shared vocabulary: the enums, payload records, and the closed Event union
//  that every other Loopscope component speaks.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_fixed() {
        let names: Vec<&str> = Phase::ORDER.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, ["timers", "pending", "poll", "check", "close"]);
    }

    #[test]
    fn legacy_io_queue_maps_to_poll() {
        assert_eq!(TaskQueue::Io.canonical(), Phase::Poll);
        assert_eq!(TaskQueue::Poll.canonical(), Phase::Poll);
        assert_eq!(TaskQueue::from(Phase::Check), TaskQueue::Check);
    }

    #[test]
    fn event_serializes_with_type_tag_and_camel_case_keys() {
        let event = Event::EnqueueTask {
            ts: 3.0,
            queue: TaskQueue::Timers,
            task_id: "timers:1".into(),
            label: "setTimeout callback".into(),
            source: Some(SourceRange::new(1, 1)),
            meta: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ENQUEUE_TASK");
        assert_eq!(json["taskId"], "timers:1");
        assert_eq!(json["queue"], "timers");
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn microtask_queue_uses_camel_case_names() {
        let json = serde_json::to_string(&MicrotaskQueue::NextTick).unwrap();
        assert_eq!(json, "\"nextTick\"");
    }

    #[test]
    fn focus_merge_keeps_absent_fields() {
        let mut focus = ExecutionFocus {
            active_box: FocusBox::Code,
            active_token_id: None,
            active_range: Some(SourceRange::new(2, 3)),
            reason: None,
        };
        focus.merge(&FocusPatch {
            active_box: Some(FocusBox::Idle),
            reason: Some("Event Loop Idle".into()),
            ..FocusPatch::default()
        });
        assert_eq!(focus.active_box, FocusBox::Idle);
        assert_eq!(focus.active_range, Some(SourceRange::new(2, 3)));
        assert_eq!(focus.reason.as_deref(), Some("Event Loop Idle"));
    }

    #[test]
    fn source_range_clamps_zero() {
        let range = SourceRange::new(0, 0);
        assert_eq!(range.line.get(), 1);
        assert_eq!(range.col.get(), 1);
    }
}
