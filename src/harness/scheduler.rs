//=====================================================
// File: harness/scheduler.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Scheduling capability seen by scripts
// Objective: Declare one method per scheduling primitive and provide the
//            instrumented implementation that reports every call as events
//            while forwarding it to the host loop
//=====================================================

//=============================================
//            Section 1: Scheduler Capability
//=============================================

use super::sink::EventSink;
use crate::event::{
    CheckpointScope, ConsoleLevel, Event, HandleKind, MicrotaskQueue, Phase, RequestKind,
    RequestStatus, ScheduleKind, SourceRange, TaskQueue,
};
use crate::interpreter::value::format_number;
use crate::interpreter::{callback_source, Callback, Completion, Job, RuntimeError};
use crate::runtime::{EventLoop, IdGenerator, IoRequest, Step};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Every scheduling primitive a script can reach.
///
/// The interpreter only ever talks to the host loop through this trait, so
/// swapping the implementation changes what is observed without touching
/// evaluation. Returned ids are the numbers scripts pass to the `clear*` calls.
pub trait Scheduler {
    fn now_ms(&self) -> f64;

    fn set_timeout(
        &mut self,
        callback: Callback,
        delay_ms: f64,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError>;

    fn set_interval(
        &mut self,
        callback: Callback,
        delay_ms: f64,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError>;

    fn set_immediate(
        &mut self,
        callback: Callback,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError>;

    /// Timeouts and intervals share one id namespace, as in the host.
    fn clear_timeout(&mut self, id: u64) -> Result<(), RuntimeError>;

    fn clear_interval(&mut self, id: u64) -> Result<(), RuntimeError>;

    fn clear_immediate(&mut self, id: u64) -> Result<(), RuntimeError>;

    fn queue_microtask(&mut self, callback: Callback, label: &str) -> Result<(), RuntimeError>;

    fn next_tick(&mut self, callback: Callback, label: &str) -> Result<(), RuntimeError>;

    fn queue_pending(
        &mut self,
        callback: Callback,
        label: &str,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError>;

    fn start_request(
        &mut self,
        request: IoRequest,
        completion: Completion,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError>;

    /// Opens a referenced socket handle that keeps the loop alive until closed.
    fn open_socket(&mut self, label: &str, site: Option<SourceRange>) -> Result<u64, RuntimeError>;

    /// Closes `socket` (if it was ever opened) and queues `listeners` on the close phase.
    fn close_socket(
        &mut self,
        socket: Option<u64>,
        listeners: Vec<Callback>,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError>;

    fn console(
        &mut self,
        level: ConsoleLevel,
        args: Vec<JsonValue>,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError>;
}

//=============================================
//            Section 2: Loop Payloads
//=============================================

/// What runs when a loop entry comes due.
#[derive(Clone)]
pub(crate) enum Work {
    Job(Job),
    /// Performed by the I/O driver at poll time, then turned into a job.
    Io {
        request: IoRequest,
        completion: Completion,
        request_id: String,
    },
}

/// Event-facing identity of a queued callback.
#[derive(Debug, Clone)]
pub(crate) struct TaskMeta {
    pub label: String,
    pub source: Option<SourceRange>,
    /// Empty until assigned; timer and poll tasks get theirs when they fire.
    pub task_id: String,
    pub handle: Option<u64>,
    pub timer_id: Option<String>,
}

#[derive(Clone)]
pub(crate) struct Entry {
    pub work: Work,
    pub meta: TaskMeta,
}

#[derive(Debug, Clone, Copy)]
enum LoopKey {
    Timer(u64),
    Immediate(u64),
    Socket(u64),
}

#[derive(Debug, Clone)]
struct HandleInfo {
    id: String,
    key: LoopKey,
    kind: HandleKind,
}

#[derive(Debug, Clone)]
struct Frame {
    task_id: String,
    source: Option<SourceRange>,
}

//=============================================
//            Section 3: Instrumented Scheduler
//=============================================

/// Event-emitting decorator in front of the host [`EventLoop`].
pub struct Instrumented {
    sink: EventSink,
    event_loop: EventLoop<Entry>,
    ids: IdGenerator,
    frames: Vec<Frame>,
    drain_open: bool,
    phase: Option<Phase>,
    handles: BTreeMap<u64, HandleInfo>,
    requests: Vec<String>,
}

impl Instrumented {
    pub(crate) fn new(sink: EventSink, event_loop: EventLoop<Entry>, ids: IdGenerator) -> Self {
        Self {
            sink,
            event_loop,
            ids,
            frames: Vec::new(),
            drain_open: false,
            phase: None,
            handles: BTreeMap::new(),
            requests: Vec::new(),
        }
    }

    fn ts(&self) -> f64 {
        self.event_loop.now() as f64
    }

    fn emit(&mut self, event: Event) -> Result<(), RuntimeError> {
        self.sink.emit(event).map_err(RuntimeError::from)
    }

    /// Teardown emission: once the sink has halted there is nothing left to report.
    fn emit_quiet(&mut self, event: Event) {
        let _ = self.sink.emit(event);
    }

    fn next_handle(&mut self) -> (u64, String) {
        let id = self.ids.next("h");
        (self.ids.issued(), id)
    }

    fn arm_timer(
        &mut self,
        callback: Callback,
        delay_ms: f64,
        repeat: bool,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError> {
        let (job, kind, label) = if repeat {
            ("setInterval", HandleKind::Interval, "setInterval callback")
        } else {
            ("setTimeout", HandleKind::Timer, "setTimeout callback")
        };
        let source = callback.source.or(site);
        let (public, handle_id) = self.next_handle();
        self.emit(Event::WebapiSchedule {
            ts: self.ts(),
            job: JsonValue::from(job),
            kind: Some(ScheduleKind::Timer),
            handle_id: Some(handle_id.clone()),
            request_id: None,
            source,
        })?;
        self.emit(Event::HandleOpen {
            ts: self.ts(),
            id: handle_id.clone(),
            kind,
            label: format!("{}({})", job, format_number(delay_ms)),
            source,
        })?;

        let timer_id = self.ids.next("tm");
        let entry = Entry {
            work: Work::Job(callback.job),
            meta: TaskMeta {
                label: label.to_string(),
                source,
                task_id: String::new(),
                handle: Some(public),
                timer_id: Some(timer_id.clone()),
            },
        };
        let (key, _) = self
            .event_loop
            .add_timer(delay_ms.ceil() as u64, repeat, entry);
        self.handles.insert(
            public,
            HandleInfo {
                id: handle_id.clone(),
                key: LoopKey::Timer(key),
                kind,
            },
        );
        self.emit(Event::TimerHeapSchedule {
            ts: self.ts(),
            timer_id,
            label: label.to_string(),
            due_in_ms: Some(delay_ms),
            handle_id: Some(handle_id),
            source,
            meta: None,
        })?;
        Ok(public)
    }

    fn clear_handle(&mut self, id: u64, kinds: &[HandleKind]) -> Result<(), RuntimeError> {
        let Some(info) = self.handles.get(&id) else {
            return Ok(());
        };
        if !kinds.contains(&info.kind) {
            return Ok(());
        }
        match info.key {
            LoopKey::Timer(key) => {
                self.event_loop.cancel_timer(key);
            }
            LoopKey::Immediate(key) => {
                self.event_loop.cancel_immediate(key);
            }
            LoopKey::Socket(_) => {}
        }
        self.close_handle(id)
    }

    /// Idempotent: closing an unknown or already-closed handle emits nothing.
    fn close_handle(&mut self, public: u64) -> Result<(), RuntimeError> {
        let Some(info) = self.handles.remove(&public) else {
            return Ok(());
        };
        if let LoopKey::Socket(key) = info.key {
            self.event_loop.unref_handle(key);
        }
        self.emit(Event::HandleClose {
            ts: self.ts(),
            id: info.id,
        })
    }

    fn enqueue_microtask(
        &mut self,
        queue: MicrotaskQueue,
        callback: Callback,
        label: &str,
    ) -> Result<(), RuntimeError> {
        let id = self.ids.next(queue.as_str());
        self.emit(Event::EnqueueMicrotask {
            ts: self.ts(),
            queue,
            id: id.clone(),
            label: label.to_string(),
            source: callback.source,
        })?;
        let entry = Entry {
            work: Work::Job(callback.job),
            meta: TaskMeta {
                label: label.to_string(),
                source: callback.source,
                task_id: id,
                handle: None,
                timer_id: None,
            },
        };
        self.event_loop.queue_microtask(queue, entry);
        Ok(())
    }

    fn enqueue_task(&mut self, queue: TaskQueue, meta: &TaskMeta) -> Result<(), RuntimeError> {
        self.emit(Event::EnqueueTask {
            ts: self.ts(),
            queue,
            task_id: meta.task_id.clone(),
            label: meta.label.clone(),
            source: meta.source,
            meta: None,
        })
    }
}

impl Scheduler for Instrumented {
    fn now_ms(&self) -> f64 {
        self.ts()
    }

    fn set_timeout(
        &mut self,
        callback: Callback,
        delay_ms: f64,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError> {
        self.arm_timer(callback, delay_ms, false, site)
    }

    fn set_interval(
        &mut self,
        callback: Callback,
        delay_ms: f64,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError> {
        self.arm_timer(callback, delay_ms, true, site)
    }

    fn set_immediate(
        &mut self,
        callback: Callback,
        site: Option<SourceRange>,
    ) -> Result<u64, RuntimeError> {
        let source = callback.source.or(site);
        let (public, handle_id) = self.next_handle();
        self.emit(Event::WebapiSchedule {
            ts: self.ts(),
            job: JsonValue::from("setImmediate"),
            kind: Some(ScheduleKind::Immediate),
            handle_id: Some(handle_id.clone()),
            request_id: None,
            source,
        })?;
        self.emit(Event::HandleOpen {
            ts: self.ts(),
            id: handle_id.clone(),
            kind: HandleKind::Immediate,
            label: "setImmediate".to_string(),
            source,
        })?;
        let entry = Entry {
            work: Work::Job(callback.job),
            meta: TaskMeta {
                label: "setImmediate callback".to_string(),
                source,
                task_id: self.ids.next("check"),
                handle: Some(public),
                timer_id: None,
            },
        };
        let key = self.event_loop.add_immediate(entry);
        self.handles.insert(
            public,
            HandleInfo {
                id: handle_id,
                key: LoopKey::Immediate(key),
                kind: HandleKind::Immediate,
            },
        );
        Ok(public)
    }

    fn clear_timeout(&mut self, id: u64) -> Result<(), RuntimeError> {
        self.clear_handle(id, &[HandleKind::Timer, HandleKind::Interval])
    }

    fn clear_interval(&mut self, id: u64) -> Result<(), RuntimeError> {
        self.clear_handle(id, &[HandleKind::Timer, HandleKind::Interval])
    }

    fn clear_immediate(&mut self, id: u64) -> Result<(), RuntimeError> {
        self.clear_handle(id, &[HandleKind::Immediate])
    }

    fn queue_microtask(&mut self, callback: Callback, label: &str) -> Result<(), RuntimeError> {
        self.enqueue_microtask(MicrotaskQueue::Promise, callback, label)
    }

    fn next_tick(&mut self, callback: Callback, label: &str) -> Result<(), RuntimeError> {
        self.enqueue_microtask(MicrotaskQueue::NextTick, callback, label)
    }

    fn queue_pending(
        &mut self,
        callback: Callback,
        label: &str,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError> {
        let meta = TaskMeta {
            label: label.to_string(),
            source: callback.source.or(site),
            task_id: self.ids.next("pending"),
            handle: None,
            timer_id: None,
        };
        self.enqueue_task(TaskQueue::Pending, &meta)?;
        self.event_loop.add_pending(Entry {
            work: Work::Job(callback.job),
            meta,
        });
        Ok(())
    }

    fn start_request(
        &mut self,
        request: IoRequest,
        completion: Completion,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError> {
        let (kind, label, task_label) = match &request {
            IoRequest::ReadFile { .. } => {
                (RequestKind::Fs, "fs.readFile callback", "fs.readFile callback")
            }
            IoRequest::Fetch { .. } => (RequestKind::Network, "fetch", "fetch response"),
        };
        let source = match &completion {
            Completion::NodeCallback(function) => callback_source(function).or(site),
            Completion::Promise(_) => site,
        };
        let request_id = self.ids.next("r");
        self.emit(Event::RequestStart {
            ts: self.ts(),
            id: request_id.clone(),
            kind,
            label: label.to_string(),
            source,
        })?;
        self.emit(Event::WebapiSchedule {
            ts: self.ts(),
            job: JsonValue::from(label),
            kind: Some(ScheduleKind::Io),
            handle_id: None,
            request_id: Some(request_id.clone()),
            source,
        })?;
        self.requests.push(request_id.clone());
        self.event_loop.add_request(Entry {
            work: Work::Io {
                request,
                completion,
                request_id,
            },
            meta: TaskMeta {
                label: task_label.to_string(),
                source,
                task_id: String::new(),
                handle: None,
                timer_id: None,
            },
        });
        Ok(())
    }

    fn open_socket(&mut self, label: &str, site: Option<SourceRange>) -> Result<u64, RuntimeError> {
        let (public, handle_id) = self.next_handle();
        let key = self.event_loop.ref_handle();
        self.handles.insert(
            public,
            HandleInfo {
                id: handle_id.clone(),
                key: LoopKey::Socket(key),
                kind: HandleKind::Socket,
            },
        );
        self.emit(Event::HandleOpen {
            ts: self.ts(),
            id: handle_id,
            kind: HandleKind::Socket,
            label: label.to_string(),
            source: site,
        })?;
        Ok(public)
    }

    fn close_socket(
        &mut self,
        socket: Option<u64>,
        listeners: Vec<Callback>,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError> {
        if let Some(socket) = socket {
            self.close_handle(socket)?;
        }
        for listener in listeners {
            let meta = TaskMeta {
                label: "close handler".to_string(),
                source: listener.source.or(site),
                task_id: self.ids.next("close"),
                handle: None,
                timer_id: None,
            };
            self.enqueue_task(TaskQueue::Close, &meta)?;
            self.event_loop.add_close(Entry {
                work: Work::Job(listener.job),
                meta,
            });
        }
        Ok(())
    }

    fn console(
        &mut self,
        level: ConsoleLevel,
        args: Vec<JsonValue>,
        site: Option<SourceRange>,
    ) -> Result<(), RuntimeError> {
        let source = self.frames.last().and_then(|frame| frame.source).or(site);
        if !self.frames.is_empty() {
            return self.emit(Event::Console {
                ts: self.ts(),
                level,
                args,
                source,
            });
        }

        let task_id = self.ids.next("sync-console");
        self.emit(Event::CallbackStart {
            ts: self.ts(),
            task_id: task_id.clone(),
            label: "sync execution".to_string(),
            source,
        })?;
        self.emit(Event::Console {
            ts: self.ts(),
            level,
            args,
            source,
        })?;
        self.emit(Event::CallbackEnd {
            ts: self.ts(),
            task_id,
        })?;
        self.checkpoint(
            CheckpointScope::AfterCallback,
            "sync console emission finished".to_string(),
        )
    }
}

//=============================================
//            Section 4: Driver Surface
//=============================================

impl Instrumented {
    pub(crate) fn next_step(&mut self) -> Step<Entry> {
        self.event_loop.next_step()
    }

    pub(crate) fn now(&self) -> u64 {
        self.event_loop.now()
    }

    pub(crate) fn park_until(&mut self, deadline_ms: u64) {
        self.event_loop.park_until(deadline_ms);
    }

    pub(crate) fn emitted(&self) -> usize {
        self.sink.emitted()
    }

    pub(crate) fn script_start(&mut self) -> Result<(), RuntimeError> {
        self.emit(Event::ScriptStart { ts: self.ts() })
    }

    pub(crate) fn diagnostics(
        &mut self,
        diagnostics: Vec<crate::event::Diagnostic>,
    ) -> Result<(), RuntimeError> {
        self.emit(Event::TsDiagnostic {
            ts: self.ts(),
            diagnostics,
        })
    }

    pub(crate) fn checkpoint(
        &mut self,
        scope: CheckpointScope,
        detail: String,
    ) -> Result<(), RuntimeError> {
        self.emit(Event::MicrotaskCheckpoint {
            ts: self.ts(),
            scope,
            detail: Some(detail),
        })
    }

    fn open_frame(&mut self, meta: &TaskMeta) -> Result<(), RuntimeError> {
        self.emit(Event::CallbackStart {
            ts: self.ts(),
            task_id: meta.task_id.clone(),
            label: meta.label.clone(),
            source: meta.source,
        })?;
        self.frames.push(Frame {
            task_id: meta.task_id.clone(),
            source: meta.source,
        });
        Ok(())
    }

    pub(crate) fn begin_microtask(
        &mut self,
        queue: MicrotaskQueue,
        meta: &TaskMeta,
    ) -> Result<(), RuntimeError> {
        if !self.drain_open {
            self.drain_open = true;
            self.emit(Event::DrainMicrotasksStart { ts: self.ts() })?;
        }
        self.emit(Event::DequeueMicrotask {
            ts: self.ts(),
            queue,
            id: meta.task_id.clone(),
        })?;
        self.open_frame(meta)
    }

    /// Pops the frame opened for `meta` and records the after-callback checkpoint.
    pub(crate) fn finish_callback(&mut self, meta: &TaskMeta) -> Result<(), RuntimeError> {
        self.frames.pop();
        self.emit(Event::CallbackEnd {
            ts: self.ts(),
            task_id: meta.task_id.clone(),
        })?;
        self.checkpoint(
            CheckpointScope::AfterCallback,
            format!("{} finished", meta.label),
        )
    }

    pub(crate) fn close_drain(&mut self) -> Result<(), RuntimeError> {
        if !self.drain_open {
            return Ok(());
        }
        self.drain_open = false;
        self.emit(Event::DrainMicrotasksEnd { ts: self.ts() })
    }

    /// Reports a loop entry becoming ready: heap promotion for timers and the
    /// enqueue for phases whose callbacks are only queued once they are due.
    pub(crate) fn fire_task(&mut self, phase: Phase, meta: &mut TaskMeta) -> Result<(), RuntimeError> {
        match phase {
            Phase::Timers => {
                meta.task_id = self.ids.next("timers");
                self.emit(Event::TimerHeapReady {
                    ts: self.ts(),
                    timer_id: meta.timer_id.clone().unwrap_or_default(),
                    task_id: meta.task_id.clone(),
                    label: meta.label.clone(),
                    source: meta.source,
                    meta: None,
                })?;
                self.enqueue_task(TaskQueue::Timers, meta)
            }
            Phase::Poll => {
                meta.task_id = self.ids.next("poll");
                self.enqueue_task(TaskQueue::Poll, meta)
            }
            Phase::Check => self.enqueue_task(TaskQueue::Check, meta),
            Phase::Pending | Phase::Close => Ok(()),
        }
    }

    pub(crate) fn begin_task(&mut self, phase: Phase, meta: &TaskMeta) -> Result<(), RuntimeError> {
        if self.phase != Some(phase) {
            self.phase = Some(phase);
            self.emit(Event::PhaseEnter {
                ts: self.ts(),
                phase,
            })?;
        }
        self.emit(Event::DequeueTask {
            ts: self.ts(),
            queue: TaskQueue::from(phase),
            task_id: meta.task_id.clone(),
        })?;
        self.open_frame(meta)
    }

    /// Ends a macrotask: one-shot handles close, intervals go back on the heap.
    pub(crate) fn finish_task(&mut self, key: u64, meta: &TaskMeta) -> Result<(), RuntimeError> {
        self.finish_callback(meta)?;
        let Some(public) = meta.handle else {
            return Ok(());
        };
        let Some(info) = self.handles.get(&public).cloned() else {
            return Ok(());
        };
        if info.kind != HandleKind::Interval {
            return self.close_handle(public);
        }
        if let Some(interval) = self.event_loop.rearm(key) {
            self.emit(Event::TimerHeapSchedule {
                ts: self.ts(),
                timer_id: meta.timer_id.clone().unwrap_or_default(),
                label: meta.label.clone(),
                due_in_ms: Some(interval as f64),
                handle_id: Some(info.id),
                source: meta.source,
                meta: None,
            })?;
        }
        Ok(())
    }

    pub(crate) fn end_request(
        &mut self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<(), RuntimeError> {
        self.requests.retain(|id| id != request_id);
        self.emit(Event::RequestEnd {
            ts: self.ts(),
            id: request_id.to_string(),
            status: Some(status),
        })
    }

    pub(crate) fn phase_exit(&mut self, phase: Phase) -> Result<(), RuntimeError> {
        self.checkpoint(
            CheckpointScope::PhaseTransition,
            format!("Leaving {} phase", phase.as_str()),
        )?;
        self.phase = None;
        self.emit(Event::PhaseExit {
            ts: self.ts(),
            phase,
        })
    }

    pub(crate) fn poll_wait_start(&mut self, timeout_ms: u64, reason: &str) -> Result<(), RuntimeError> {
        self.emit(Event::PollWaitStart {
            ts: self.ts(),
            timeout_ms: Some(timeout_ms),
            reason: Some(reason.to_string()),
        })
    }

    pub(crate) fn poll_wait_end(&mut self, reason: &str) -> Result<(), RuntimeError> {
        self.emit(Event::PollWaitEnd {
            ts: self.ts(),
            reason: Some(reason.to_string()),
        })
    }

    /// Reports a fatal failure and releases everything the run still holds:
    /// open frames, the drain bracket, handles and in-flight requests.
    pub(crate) fn fail(&mut self, message: String, stack: Option<String>) {
        let error = Event::RuntimeError {
            ts: self.ts(),
            message,
            stack,
        };
        if self.frames.is_empty() {
            let task_id = self.ids.next("sync-error");
            self.emit_quiet(Event::CallbackStart {
                ts: self.ts(),
                task_id: task_id.clone(),
                label: "sync execution".to_string(),
                source: None,
            });
            self.emit_quiet(error);
            self.emit_quiet(Event::CallbackEnd {
                ts: self.ts(),
                task_id,
            });
        } else {
            self.emit_quiet(error);
            while let Some(frame) = self.frames.pop() {
                self.emit_quiet(Event::CallbackEnd {
                    ts: self.ts(),
                    task_id: frame.task_id,
                });
            }
        }
        if std::mem::take(&mut self.drain_open) {
            self.emit_quiet(Event::DrainMicrotasksEnd { ts: self.ts() });
        }
        for (_, info) in std::mem::take(&mut self.handles) {
            self.emit_quiet(Event::HandleClose {
                ts: self.ts(),
                id: info.id,
            });
        }
        for id in std::mem::take(&mut self.requests) {
            self.emit_quiet(Event::RequestEnd {
                ts: self.ts(),
                id,
                status: Some(RequestStatus::Cancelled),
            });
        }
        self.event_loop.clear();
    }

    pub(crate) fn script_end(&mut self) {
        self.emit_quiet(Event::ScriptEnd { ts: self.ts() });
    }
}
