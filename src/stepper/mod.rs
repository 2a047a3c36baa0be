//=====================================================
// File: stepper/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Synthetic tick stepper
// Objective: Continue a reduced trace past its last recorded event by
//            deriving the next loop step from static priority rules
//=====================================================

use crate::event::{CheckpointScope, Event, FocusBox, FocusPatch, MicrotaskQueue, Phase, TaskQueue};
use crate::reducer::{QueueItem, VisualizerState};

/// Stamps synthetic events one millisecond apart after the last applied event.
struct Stamp(f64);

impl Stamp {
    fn after(state: &VisualizerState) -> Self {
        Stamp(state.last_ts())
    }

    fn next(&mut self) -> f64 {
        self.0 += 1.0;
        self.0
    }
}

/// The events a real loop would emit next from `state`, or nothing once idle.
///
/// Rules, first match wins:
/// 1. a frame on the stack finishes;
/// 2. the head of `nextTick` runs, then
/// 3. the head of `promise`;
/// 4. an open drain bracket with both microtask queues empty closes;
/// 5. a phase whose queue ran dry exits, while one with work keeps running it;
/// 6. the first non-empty phase queue in loop order is entered and its head runs;
/// 7. the earliest timer-heap entry becomes ready;
/// 8. an active poll wait ends;
/// 9. otherwise the loop is idle, marked once by a focus hint.
pub fn tick(state: &VisualizerState) -> Vec<Event> {
    let mut stamp = Stamp::after(state);

    if let Some(frame) = state.call_stack.last() {
        return vec![
            Event::CallbackEnd {
                ts: stamp.next(),
                task_id: frame.id.clone(),
            },
            Event::MicrotaskCheckpoint {
                ts: stamp.next(),
                scope: CheckpointScope::AfterCallback,
                detail: Some(format!("Completed {}", frame.label)),
            },
        ];
    }

    for queue in MicrotaskQueue::ORDER {
        if let Some(item) = state.queues.microtasks(queue).first() {
            let mut events = Vec::with_capacity(3);
            if !state.draining_microtasks {
                events.push(Event::DrainMicrotasksStart { ts: stamp.next() });
            }
            events.push(Event::DequeueMicrotask {
                ts: stamp.next(),
                queue,
                id: item.id.clone(),
            });
            events.push(start_callback(&mut stamp, item));
            return events;
        }
    }

    if state.draining_microtasks {
        return vec![Event::DrainMicrotasksEnd { ts: stamp.next() }];
    }

    if let Some(phase) = state.phase {
        return match state.queues.task(phase).first() {
            None => vec![Event::PhaseExit {
                ts: stamp.next(),
                phase,
            }],
            Some(item) => run_task(&mut stamp, phase, item, false),
        };
    }

    for phase in Phase::ORDER {
        if let Some(item) = state.queues.task(phase).first() {
            return run_task(&mut stamp, phase, item, true);
        }
    }

    if let Some(timer) = next_due(&state.timer_heap) {
        return vec![Event::TimerHeapReady {
            ts: stamp.next(),
            timer_id: timer.id.clone(),
            task_id: format!("timers:sim:{}", state.timeline.len()),
            label: timer.label.clone(),
            source: timer.source,
            meta: timer.meta.clone(),
        }];
    }

    if state.poll_wait.active {
        return vec![Event::PollWaitEnd {
            ts: stamp.next(),
            reason: Some("Simulated wake".to_string()),
        }];
    }

    if state.focus.active_box != FocusBox::Idle {
        return vec![Event::FocusSet {
            ts: stamp.next(),
            focus: FocusPatch {
                active_box: Some(FocusBox::Idle),
                reason: Some("Event Loop Idle".to_string()),
                ..FocusPatch::default()
            },
        }];
    }

    Vec::new()
}

/// Heap entry with the smallest due time; ties and undated entries keep insertion order.
fn next_due(heap: &[QueueItem]) -> Option<&QueueItem> {
    let due = |item: &QueueItem| item.due_at.unwrap_or(f64::INFINITY);
    heap.iter().min_by(|a, b| due(a).total_cmp(&due(b)))
}

fn run_task(stamp: &mut Stamp, phase: Phase, item: &QueueItem, enter: bool) -> Vec<Event> {
    let mut events = Vec::with_capacity(3);
    if enter {
        events.push(Event::PhaseEnter {
            ts: stamp.next(),
            phase,
        });
    }
    events.push(Event::DequeueTask {
        ts: stamp.next(),
        queue: TaskQueue::from(phase),
        task_id: item.id.clone(),
    });
    events.push(start_callback(stamp, item));
    events
}

fn start_callback(stamp: &mut Stamp, item: &QueueItem) -> Event {
    Event::CallbackStart {
        ts: stamp.next(),
        task_id: item.id.clone(),
        label: item.label.clone(),
        source: item.source,
    }
}

/// Folds up to `max_ticks` ticks into `state`, returning every synthetic event.
///
/// Stops early once a tick yields nothing.
pub fn advance(state: &mut VisualizerState, max_ticks: usize) -> Vec<Event> {
    let mut emitted = Vec::new();
    for _ in 0..max_ticks {
        let batch = tick(state);
        if batch.is_empty() {
            break;
        }
        for event in &batch {
            state.apply(event);
        }
        emitted.extend(batch);
    }
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{apply_event, create_initial_state, reduce_events};

    fn enqueue_micro(queue: MicrotaskQueue, id: &str, ts: f64) -> Event {
        Event::EnqueueMicrotask {
            ts,
            queue,
            id: id.to_string(),
            label: id.to_string(),
            source: None,
        }
    }

    #[test]
    fn fresh_state_is_already_idle() {
        assert!(tick(&create_initial_state()).is_empty());
    }

    #[test]
    fn next_tick_runs_before_promise() {
        let state = reduce_events(
            &[
                enqueue_micro(MicrotaskQueue::Promise, "p1", 1.0),
                enqueue_micro(MicrotaskQueue::NextTick, "n1", 2.0),
            ],
            create_initial_state(),
        );
        let events = tick(&state);
        let tags: Vec<&str> = events.iter().map(Event::tag).collect();
        assert_eq!(
            tags,
            ["DRAIN_MICROTASKS_START", "DEQUEUE_MICROTASK", "CALLBACK_START"]
        );
        assert!(matches!(
            &events[1],
            Event::DequeueMicrotask { queue: MicrotaskQueue::NextTick, id, .. } if id == "n1"
        ));
        assert_eq!(events[0].ts(), 3.0);
    }

    #[test]
    fn finishing_a_frame_reports_a_checkpoint() {
        let state = reduce_events(
            &[
                Event::PhaseEnter {
                    ts: 1.0,
                    phase: Phase::Timers,
                },
                Event::CallbackStart {
                    ts: 2.0,
                    task_id: "t1".to_string(),
                    label: "setTimeout callback".to_string(),
                    source: None,
                },
            ],
            create_initial_state(),
        );
        assert_eq!(
            tick(&state),
            vec![
                Event::CallbackEnd {
                    ts: 3.0,
                    task_id: "t1".to_string()
                },
                Event::MicrotaskCheckpoint {
                    ts: 4.0,
                    scope: CheckpointScope::AfterCallback,
                    detail: Some("Completed setTimeout callback".to_string()),
                },
            ]
        );
    }

    #[test]
    fn idle_focus_is_emitted_once() {
        let state = apply_event(
            create_initial_state(),
            &Event::FocusSet {
                ts: 1.0,
                focus: FocusPatch {
                    active_box: Some(FocusBox::Stack),
                    ..FocusPatch::default()
                },
            },
        );
        let first = tick(&state);
        assert_eq!(first.len(), 1);
        let state = reduce_events(&first, state);
        assert_eq!(state.focus.active_box, FocusBox::Idle);
        assert!(tick(&state).is_empty());
    }

    #[test]
    fn earliest_due_timer_is_promoted_first() {
        let schedule = |id: &str, ts: f64, due: f64| Event::TimerHeapSchedule {
            ts,
            timer_id: id.to_string(),
            label: id.to_string(),
            due_in_ms: Some(due),
            handle_id: None,
            source: None,
            meta: None,
        };
        let state = reduce_events(
            &[
                schedule("tm:late", 1.0, 50.0),
                schedule("tm:soon", 2.0, 5.0),
                schedule("tm:tie", 3.0, 4.0),
            ],
            create_initial_state(),
        );
        match tick(&state).as_slice() {
            [Event::TimerHeapReady { timer_id, .. }] => assert_eq!(timer_id, "tm:soon"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn heap_timers_are_promoted_then_run() {
        let mut state = apply_event(
            create_initial_state(),
            &Event::TimerHeapSchedule {
                ts: 1.0,
                timer_id: "tm:1".to_string(),
                label: "setTimeout(5)".to_string(),
                due_in_ms: Some(5.0),
                handle_id: None,
                source: None,
                meta: None,
            },
        );
        let events = advance(&mut state, 16);
        let tags: Vec<&str> = events.iter().map(Event::tag).collect();
        assert_eq!(
            tags,
            [
                "TIMER_HEAP_READY",
                "PHASE_ENTER",
                "DEQUEUE_TASK",
                "CALLBACK_START",
                "CALLBACK_END",
                "MICROTASK_CHECKPOINT",
                "PHASE_EXIT",
            ]
        );
        assert!(matches!(
            &events[0],
            Event::TimerHeapReady { task_id, .. } if task_id == "timers:sim:1"
        ));
        assert!(state.degraded.is_clean());
        assert!(state.timer_heap.is_empty());
    }
}
