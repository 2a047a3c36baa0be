//=====================================================
// File: reducer/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Deterministic loop state machine
// Objective: Fold an ordered event sequence into one VisualizerState, the
//            same way for live harness streams and bundled traces
//=====================================================

//=============================================
//            Section 1: Imports & Submodules
//=============================================

pub mod normalize;
pub mod state;

pub use normalize::normalize_console_stack_flow;
pub use state::{
    ActiveHandle, ActiveRequest, Checkpoint, Degraded, ErrorEntry, ItemState, LogEntry,
    PollWait, QueueItem, Queues, StackFrame, VisualizerState,
};

use crate::event::{
    CheckpointScope, Event, ExecutionFocus, FocusBox, MicrotaskQueue, Phase, SourceRange,
    TaskQueue,
};

//=============================================
//            Section 2: Public Fold
//=============================================

pub fn create_initial_state() -> VisualizerState {
    VisualizerState::default()
}

/// Applies one event, returning the next state. Never drops an event.
pub fn apply_event(mut state: VisualizerState, event: &Event) -> VisualizerState {
    state.apply(event);
    state
}

/// Folds `events` in order starting from `seed`.
pub fn reduce_events<'a, I>(events: I, seed: VisualizerState) -> VisualizerState
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().fold(seed, apply_event)
}

/// Task queue a phase drains.
pub fn queues_for_phase(phase: Phase) -> TaskQueue {
    TaskQueue::from(phase)
}

pub fn microtask_order() -> [MicrotaskQueue; 2] {
    MicrotaskQueue::ORDER
}

//=============================================
//            Section 3: Transition Rules
//=============================================

impl VisualizerState {
    /// In-place form of [`apply_event`].
    pub fn apply(&mut self, event: &Event) {
        self.timeline.push(event.clone());

        match event {
            Event::ScriptStart { .. } => self.is_running = true,
            Event::ScriptEnd { ts } => {
                self.is_running = false;
                self.phase = None;
                self.poll_wait = PollWait::default();
                self.microtask_checkpoint = Some(Checkpoint {
                    scope: CheckpointScope::ScriptEnd,
                    detail: Some("Script finished".to_string()),
                    ts: *ts,
                });
                self.active_task_id = None;
            }
            Event::WebapiSchedule { source, .. } => {
                if let Some(range) = source {
                    self.focus_on(FocusBox::Code, *range, Some("Scheduling API"));
                }
            }
            Event::TimerHeapSchedule {
                ts,
                timer_id,
                label,
                due_in_ms,
                handle_id,
                source,
                meta,
            } => {
                let mut item = QueueItem::queued(timer_id.as_str(), label.as_str())
                    .with_source(*source)
                    .with_meta(meta.clone());
                item.handle_id = handle_id.clone();
                item.due_at = Some(*ts + due_in_ms.unwrap_or(0.0));
                self.timer_heap.push(item);
                if let Some(range) = source {
                    self.focus_on(FocusBox::TimerHeap, *range, Some("Timer scheduled"));
                }
            }
            Event::TimerHeapReady {
                timer_id,
                task_id,
                label,
                source,
                meta,
                ..
            } => {
                remove_item(&mut self.timer_heap, timer_id);
                push_unique(
                    &mut self.queues.timers,
                    QueueItem::queued(task_id.as_str(), label.as_str())
                        .with_source(*source)
                        .with_meta(meta.clone()),
                );
                self.queues.sync_io_alias();
            }
            Event::PhaseEnter { phase, .. } => self.phase = Some(*phase),
            Event::PhaseExit { phase, .. } => {
                if self.phase == Some(*phase) {
                    self.phase = None;
                }
            }
            Event::PollWaitStart {
                timeout_ms, reason, ..
            } => {
                self.poll_wait = PollWait {
                    active: true,
                    timeout_ms: *timeout_ms,
                    reason: reason.clone(),
                };
            }
            Event::PollWaitEnd { reason, .. } => {
                self.poll_wait = PollWait {
                    active: false,
                    timeout_ms: None,
                    reason: reason.clone(),
                };
            }
            Event::MicrotaskCheckpoint { ts, scope, detail } => {
                self.microtask_checkpoint = Some(Checkpoint {
                    scope: *scope,
                    detail: detail.clone(),
                    ts: *ts,
                });
            }
            Event::EnqueueTask {
                queue,
                task_id,
                label,
                source,
                meta,
                ..
            } => {
                let item = QueueItem::queued(task_id.as_str(), label.as_str())
                    .with_source(*source)
                    .with_meta(meta.clone());
                push_unique(self.queues.task_mut(queue.canonical()), item);
                self.queues.sync_io_alias();
                if let Some(range) = source {
                    self.focus_on(FocusBox::Code, *range, None);
                }
            }
            Event::DequeueTask { queue, task_id, .. } => {
                let removed = remove_item(self.queues.task_mut(queue.canonical()), task_id);
                self.queues.sync_io_alias();
                if removed.is_none() {
                    self.degraded.unmatched_dequeue_task += 1;
                }
                self.active_task_id = Some(task_id.clone());
            }
            Event::CallbackStart {
                task_id,
                label,
                source,
                ..
            } => {
                self.call_stack.push(StackFrame {
                    id: task_id.clone(),
                    label: label.clone(),
                    source: *source,
                });
                if let Some(range) = source {
                    self.focus_on(FocusBox::Code, *range, None);
                }
            }
            Event::CallbackEnd { task_id, .. } => {
                match self.call_stack.iter().rposition(|frame| &frame.id == task_id) {
                    Some(index) => {
                        self.call_stack.remove(index);
                    }
                    None => {
                        self.degraded.unmatched_callback_end += 1;
                        self.call_stack.pop();
                    }
                }
                if self.active_task_id.as_ref() == Some(task_id) {
                    self.active_task_id = None;
                }
            }
            Event::EnqueueMicrotask {
                queue,
                id,
                label,
                source,
                ..
            } => {
                let item = QueueItem::queued(id.as_str(), label.as_str()).with_source(*source);
                push_unique(self.queues.microtasks_mut(*queue), item);
                if let Some(range) = source {
                    self.focus_on(FocusBox::Code, *range, None);
                }
            }
            Event::DequeueMicrotask { queue, id, .. } => {
                remove_item(self.queues.microtasks_mut(*queue), id);
            }
            Event::DrainMicrotasksStart { .. } => self.draining_microtasks = true,
            Event::DrainMicrotasksEnd { .. } => self.draining_microtasks = false,
            Event::EnterFunction { name, source, .. } => {
                // The timeline already holds this event, so ids stay unique per position.
                self.call_stack.push(StackFrame {
                    id: format!("fn:{}", self.timeline.len()),
                    label: name.clone(),
                    source: *source,
                });
                if let Some(range) = source {
                    self.focus_on(FocusBox::Code, *range, None);
                }
            }
            Event::ExitFunction { name, .. } => {
                if self.call_stack.last().is_some_and(|frame| &frame.label == name) {
                    self.call_stack.pop();
                } else if let Some(index) =
                    self.call_stack.iter().rposition(|frame| &frame.label == name)
                {
                    self.call_stack.remove(index);
                } else {
                    self.degraded.unmatched_exit_function += 1;
                }
            }
            Event::Console {
                ts,
                level,
                args,
                source,
            } => self.logs.push(LogEntry {
                level: *level,
                args: args.clone(),
                ts: *ts,
                source: *source,
            }),
            Event::HandleOpen {
                ts,
                id,
                kind,
                label,
                source,
            } => {
                if !self.active_handles.iter().any(|handle| &handle.id == id) {
                    self.active_handles.push(ActiveHandle {
                        id: id.clone(),
                        kind: *kind,
                        label: label.clone(),
                        source: *source,
                        opened_at: *ts,
                    });
                }
            }
            Event::HandleClose { id, .. } => {
                self.active_handles.retain(|handle| &handle.id != id);
                self.timer_heap
                    .retain(|item| item.handle_id.as_ref() != Some(id));
            }
            Event::RequestStart {
                ts,
                id,
                kind,
                label,
                source,
            } => {
                if !self.active_requests.iter().any(|request| &request.id == id) {
                    self.active_requests.push(ActiveRequest {
                        id: id.clone(),
                        kind: *kind,
                        label: label.clone(),
                        source: *source,
                        started_at: *ts,
                    });
                }
            }
            Event::RequestEnd { id, .. } => {
                self.active_requests.retain(|request| &request.id != id);
            }
            Event::RuntimeError { ts, message, stack } => self.errors.push(ErrorEntry {
                message: message.clone(),
                stack: stack.clone(),
                ts: *ts,
            }),
            Event::TsDiagnostic { diagnostics, .. } => self.diagnostics = diagnostics.clone(),
            Event::FocusSet { focus, .. } => self.focus.merge(focus),
        }
    }

    fn focus_on(&mut self, active_box: FocusBox, range: SourceRange, reason: Option<&str>) {
        let previous = std::mem::take(&mut self.focus);
        self.focus = ExecutionFocus {
            active_box,
            active_range: Some(range),
            reason: reason.map(str::to_string).or(previous.reason),
            active_token_id: previous.active_token_id,
        };
    }
}

fn remove_item(items: &mut Vec<QueueItem>, id: &str) -> Option<QueueItem> {
    let index = items.iter().position(|item| item.id == id)?;
    Some(items.remove(index))
}

/// Queues are keyed by id; a repeated enqueue replaces nothing and adds nothing.
fn push_unique(items: &mut Vec<QueueItem>, item: QueueItem) {
    if !items.iter().any(|existing| existing.id == item.id) {
        items.push(item);
    }
}

//=============================================/*
//  The fold is total: every tag has exactly one rule above, unmatched ids fall
//  back to a best-effort rule and bump a Degraded counter instead of failing.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{HandleKind, RequestKind};

    fn enqueue(queue: TaskQueue, id: &str, ts: f64) -> Event {
        Event::EnqueueTask {
            ts,
            queue,
            task_id: id.to_string(),
            label: id.to_string(),
            source: None,
            meta: None,
        }
    }

    #[test]
    fn legacy_io_queue_lands_in_poll_and_stays_aliased() {
        let state = reduce_events(
            &[
                enqueue(TaskQueue::Io, "io:1", 1.0),
                enqueue(TaskQueue::Poll, "poll:2", 2.0),
            ],
            create_initial_state(),
        );
        let ids: Vec<&str> = state.queues.poll.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["io:1", "poll:2"]);
        assert_eq!(state.queues.io, state.queues.poll);

        let state = apply_event(
            state,
            &Event::DequeueTask {
                ts: 3.0,
                queue: TaskQueue::Io,
                task_id: "poll:2".to_string(),
            },
        );
        assert_eq!(state.queues.poll.len(), 1);
        assert_eq!(state.queues.io, state.queues.poll);
        assert_eq!(state.active_task_id.as_deref(), Some("poll:2"));
    }

    #[test]
    fn unknown_dequeue_still_activates_the_id() {
        let state = apply_event(
            create_initial_state(),
            &Event::DequeueTask {
                ts: 1.0,
                queue: TaskQueue::Timers,
                task_id: "ghost".to_string(),
            },
        );
        assert_eq!(state.active_task_id.as_deref(), Some("ghost"));
        assert_eq!(state.degraded.unmatched_dequeue_task, 1);
    }

    #[test]
    fn unmatched_callback_end_pops_the_top_and_is_counted() {
        let start = |id: &str, ts| Event::CallbackStart {
            ts,
            task_id: id.to_string(),
            label: id.to_string(),
            source: None,
        };
        let state = reduce_events(
            &[
                start("a", 1.0),
                start("b", 2.0),
                Event::CallbackEnd {
                    ts: 3.0,
                    task_id: "a".to_string(),
                },
            ],
            create_initial_state(),
        );
        assert_eq!(state.call_stack.len(), 1);
        assert_eq!(state.call_stack[0].id, "b");
        assert!(state.degraded.is_clean());

        let state = apply_event(
            state,
            &Event::CallbackEnd {
                ts: 4.0,
                task_id: "zzz".to_string(),
            },
        );
        assert!(state.call_stack.is_empty());
        assert_eq!(state.degraded.unmatched_callback_end, 1);
    }

    #[test]
    fn handles_and_requests_are_sets() {
        let open = Event::HandleOpen {
            ts: 1.0,
            id: "h:1".to_string(),
            kind: HandleKind::Timer,
            label: "setTimeout(10)".to_string(),
            source: None,
        };
        let start = Event::RequestStart {
            ts: 1.0,
            id: "r:1".to_string(),
            kind: RequestKind::Fs,
            label: "fs.readFile callback".to_string(),
            source: None,
        };
        let state = reduce_events(
            &[open.clone(), open, start.clone(), start],
            create_initial_state(),
        );
        assert_eq!(state.active_handles.len(), 1);
        assert_eq!(state.active_requests.len(), 1);
    }

    #[test]
    fn closing_a_timer_handle_drops_its_heap_entry() {
        let state = reduce_events(
            &[
                Event::TimerHeapSchedule {
                    ts: 1.0,
                    timer_id: "tm:2".to_string(),
                    label: "setTimeout(100)".to_string(),
                    due_in_ms: Some(100.0),
                    handle_id: Some("h:1".to_string()),
                    source: Some(SourceRange::new(1, 1)),
                    meta: None,
                },
                Event::HandleClose {
                    ts: 2.0,
                    id: "h:1".to_string(),
                },
            ],
            create_initial_state(),
        );
        assert!(state.timer_heap.is_empty());
        assert_eq!(state.focus.active_box, FocusBox::TimerHeap);
        assert_eq!(state.focus.reason.as_deref(), Some("Timer scheduled"));
    }

    #[test]
    fn timer_ready_moves_heap_entry_to_timers_under_the_task_id() {
        let state = reduce_events(
            &[
                Event::TimerHeapSchedule {
                    ts: 1.0,
                    timer_id: "tm:1".to_string(),
                    label: "setTimeout(0)".to_string(),
                    due_in_ms: Some(0.0),
                    handle_id: None,
                    source: None,
                    meta: None,
                },
                Event::TimerHeapReady {
                    ts: 2.0,
                    timer_id: "tm:1".to_string(),
                    task_id: "timers:2".to_string(),
                    label: "setTimeout(0)".to_string(),
                    source: None,
                    meta: None,
                },
            ],
            create_initial_state(),
        );
        assert!(state.timer_heap.is_empty());
        assert_eq!(state.queues.timers[0].id, "timers:2");
    }

    #[test]
    fn script_end_is_a_hard_reset() {
        let state = reduce_events(
            &[
                Event::ScriptStart { ts: 0.0 },
                Event::PhaseEnter {
                    ts: 1.0,
                    phase: Phase::Poll,
                },
                Event::PollWaitStart {
                    ts: 2.0,
                    timeout_ms: Some(10),
                    reason: None,
                },
                enqueue(TaskQueue::Check, "check:1", 3.0),
                Event::ScriptEnd { ts: 4.0 },
            ],
            create_initial_state(),
        );
        assert!(!state.is_running);
        assert_eq!(state.phase, None);
        assert!(!state.poll_wait.active);
        assert_eq!(state.active_task_id, None);
        assert_eq!(
            state.microtask_checkpoint.map(|c| c.scope),
            Some(CheckpointScope::ScriptEnd)
        );
        assert_eq!(state.queues.check.len(), 1);
    }

    #[test]
    fn function_frames_pop_by_label() {
        let enter = |name: &str, ts| Event::EnterFunction {
            ts,
            name: name.to_string(),
            source: None,
        };
        let exit = |name: &str, ts| Event::ExitFunction {
            ts,
            name: name.to_string(),
        };
        let state = reduce_events(
            &[enter("outer", 1.0), enter("inner", 2.0), exit("outer", 3.0)],
            create_initial_state(),
        );
        assert_eq!(state.call_stack.len(), 1);
        assert_eq!(state.call_stack[0].label, "inner");
        assert_eq!(state.call_stack[0].id, "fn:2");

        let state = apply_event(state, &exit("nobody", 4.0));
        assert_eq!(state.call_stack.len(), 1);
        assert_eq!(state.degraded.unmatched_exit_function, 1);
    }

    #[test]
    fn ready_timer_already_enqueued_is_not_duplicated() {
        let state = reduce_events(
            &[
                Event::TimerHeapSchedule {
                    ts: 1.0,
                    timer_id: "tm:1".to_string(),
                    label: "setTimeout callback".to_string(),
                    due_in_ms: Some(4.0),
                    handle_id: None,
                    source: None,
                    meta: None,
                },
                enqueue(TaskQueue::Timers, "timers:1", 5.0),
                Event::TimerHeapReady {
                    ts: 5.0,
                    timer_id: "tm:1".to_string(),
                    task_id: "timers:1".to_string(),
                    label: "setTimeout callback".to_string(),
                    source: None,
                    meta: None,
                },
            ],
            create_initial_state(),
        );
        assert!(state.timer_heap.is_empty());
        let ids: Vec<&str> = state.queues.timers.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["timers:1"]);
    }
}
