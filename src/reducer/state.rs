//=====================================================
// File: reducer/state.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Visualizer snapshot model
// Objective: Describe the loop state the reducer owns: stack, queues, timer
//            heap, live handles and requests, and the accumulated history
//=====================================================

use crate::event::{
    CheckpointScope, ConsoleLevel, Diagnostic, Event, ExecutionFocus, HandleKind,
    MicrotaskQueue, Phase, RequestKind, SourceRange,
};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Queued,
    Running,
    Done,
    Cancelled,
}

/// One entry of a task queue, a microtask queue, or the timer heap.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRange>,
    pub state: ItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<JsonValue>,
    /// Owning handle of a timer-heap entry; closing the handle drops the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<String>,
    /// Absolute due time of a timer-heap entry, `ts + dueInMs` of its schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<f64>,
}

impl QueueItem {
    pub fn queued(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source: None,
            state: ItemState::Queued,
            meta: None,
            handle_id: None,
            due_at: None,
        }
    }

    pub fn with_source(mut self, source: Option<SourceRange>) -> Self {
        self.source = source;
        self
    }

    pub fn with_meta(mut self, meta: Option<JsonValue>) -> Self {
        self.meta = meta;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackFrame {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRange>,
}

/// The five phase queues, the legacy `io` alias of `poll`, and both microtask queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Queues {
    pub timers: Vec<QueueItem>,
    pub pending: Vec<QueueItem>,
    pub poll: Vec<QueueItem>,
    pub io: Vec<QueueItem>,
    pub check: Vec<QueueItem>,
    pub close: Vec<QueueItem>,
    pub next_tick: Vec<QueueItem>,
    pub promise: Vec<QueueItem>,
}

impl Queues {
    pub fn task(&self, phase: Phase) -> &[QueueItem] {
        match phase {
            Phase::Timers => &self.timers,
            Phase::Pending => &self.pending,
            Phase::Poll => &self.poll,
            Phase::Check => &self.check,
            Phase::Close => &self.close,
        }
    }

    pub(crate) fn task_mut(&mut self, phase: Phase) -> &mut Vec<QueueItem> {
        match phase {
            Phase::Timers => &mut self.timers,
            Phase::Pending => &mut self.pending,
            Phase::Poll => &mut self.poll,
            Phase::Check => &mut self.check,
            Phase::Close => &mut self.close,
        }
    }

    pub fn microtasks(&self, queue: MicrotaskQueue) -> &[QueueItem] {
        match queue {
            MicrotaskQueue::NextTick => &self.next_tick,
            MicrotaskQueue::Promise => &self.promise,
        }
    }

    pub(crate) fn microtasks_mut(&mut self, queue: MicrotaskQueue) -> &mut Vec<QueueItem> {
        match queue {
            MicrotaskQueue::NextTick => &mut self.next_tick,
            MicrotaskQueue::Promise => &mut self.promise,
        }
    }

    /// Re-copies `poll` into `io`; called after every task-queue mutation.
    pub(crate) fn sync_io_alias(&mut self) {
        self.io.clone_from(&self.poll);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHandle {
    pub id: String,
    pub kind: HandleKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRange>,
    pub opened_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub id: String,
    pub kind: RequestKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRange>,
    pub started_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub scope: CheckpointScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub ts: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollWait {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: ConsoleLevel,
    pub args: Vec<JsonValue>,
    pub ts: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub ts: f64,
}

/// How often the fold fell back on a best-effort rule for an unmatched id.
///
/// All zero for a well-formed harness trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Degraded {
    /// `CALLBACK_END` with no frame of that task id; the top frame was popped.
    pub unmatched_callback_end: u32,
    /// `DEQUEUE_TASK` for an id absent from its queue.
    pub unmatched_dequeue_task: u32,
    /// `EXIT_FUNCTION` naming no frame on the stack.
    pub unmatched_exit_function: u32,
}

impl Degraded {
    pub fn is_clean(&self) -> bool {
        *self == Degraded::default()
    }
}

/// The authoritative snapshot of the loop, as folded from events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerState {
    pub runtime: &'static str,
    pub phase: Option<Phase>,
    pub is_running: bool,
    pub call_stack: Vec<StackFrame>,
    pub queues: Queues,
    pub timer_heap: Vec<QueueItem>,
    pub poll_wait: PollWait,
    pub active_handles: Vec<ActiveHandle>,
    pub active_requests: Vec<ActiveRequest>,
    pub microtask_checkpoint: Option<Checkpoint>,
    pub active_task_id: Option<String>,
    pub draining_microtasks: bool,
    pub logs: Vec<LogEntry>,
    pub diagnostics: Vec<Diagnostic>,
    pub errors: Vec<ErrorEntry>,
    pub timeline: Vec<Event>,
    pub focus: ExecutionFocus,
    pub degraded: Degraded,
}

impl Default for VisualizerState {
    fn default() -> Self {
        Self {
            runtime: "node",
            phase: None,
            is_running: false,
            call_stack: Vec::new(),
            queues: Queues::default(),
            timer_heap: Vec::new(),
            poll_wait: PollWait::default(),
            active_handles: Vec::new(),
            active_requests: Vec::new(),
            microtask_checkpoint: None,
            active_task_id: None,
            draining_microtasks: false,
            logs: Vec::new(),
            diagnostics: Vec::new(),
            errors: Vec::new(),
            timeline: Vec::new(),
            focus: ExecutionFocus::default(),
            degraded: Degraded::default(),
        }
    }
}

impl VisualizerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing could run or keep the loop alive.
    pub fn is_quiescent(&self) -> bool {
        self.call_stack.is_empty()
            && Phase::ORDER.iter().all(|phase| self.queues.task(*phase).is_empty())
            && self.queues.next_tick.is_empty()
            && self.queues.promise.is_empty()
            && self.timer_heap.is_empty()
            && self.active_handles.is_empty()
            && self.active_requests.is_empty()
    }

    /// Timestamp of the last applied event, or 0 for a fresh state.
    pub fn last_ts(&self) -> f64 {
        self.timeline.last().map(Event::ts).unwrap_or(0.0)
    }
}
