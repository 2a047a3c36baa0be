//=====================================================
// File: reducer/normalize.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Legacy trace normalisation
// Objective: Give console output a source and a frame even when an older
//            trace omitted them
//=====================================================

use crate::event::{Event, SourceRange};

struct OpenFrame {
    id: String,
    source: Option<SourceRange>,
}

fn event_source(event: &Event) -> Option<SourceRange> {
    match event {
        Event::WebapiSchedule { source, .. }
        | Event::HandleOpen { source, .. }
        | Event::RequestStart { source, .. }
        | Event::TimerHeapSchedule { source, .. }
        | Event::TimerHeapReady { source, .. }
        | Event::EnqueueTask { source, .. }
        | Event::CallbackStart { source, .. }
        | Event::EnqueueMicrotask { source, .. }
        | Event::Console { source, .. }
        | Event::EnterFunction { source, .. } => *source,
        _ => None,
    }
}

/// Rewrites `events` so no `CONSOLE` or `RUNTIME_ERROR` appears on an empty stack.
///
/// A `CONSOLE` without a source borrows the top frame's source, or the last
/// source seen anywhere. Records outside any frame are wrapped in a synthetic
/// `sync execution` callback whose start is stamped one millisecond earlier.
/// Harness traces already satisfy both rules and pass through unchanged.
pub fn normalize_console_stack_flow(events: &[Event]) -> Vec<Event> {
    let mut normalized = Vec::with_capacity(events.len());
    let mut stack: Vec<OpenFrame> = Vec::new();
    let mut synthetic = 0u32;
    let mut last_known: Option<SourceRange> = None;

    for raw in events {
        let mut event = raw.clone();

        if let Event::Console { source, .. } = &mut event {
            if source.is_none() {
                *source = stack.last().and_then(|frame| frame.source).or(last_known);
            }
        }

        if matches!(event, Event::Console { .. } | Event::RuntimeError { .. }) && stack.is_empty() {
            let source = match &event {
                Event::Console { source, .. } => source.or(last_known),
                _ => last_known,
            };
            synthetic += 1;
            let task_id = format!("sync-console-fallback:{}", synthetic);
            let ts = event.ts();
            normalized.push(Event::CallbackStart {
                ts: (ts - 1.0).max(0.0),
                task_id: task_id.clone(),
                label: "sync execution".to_string(),
                source,
            });
            if let Event::Console {
                source: Some(range),
                ..
            } = &event
            {
                last_known = Some(*range);
            }
            normalized.push(event);
            normalized.push(Event::CallbackEnd { ts, task_id });
            continue;
        }

        match &event {
            Event::CallbackStart { task_id, source, .. } => stack.push(OpenFrame {
                id: task_id.clone(),
                source: *source,
            }),
            Event::CallbackEnd { task_id, .. } => {
                match stack.iter().position(|frame| &frame.id == task_id) {
                    Some(index) => {
                        stack.remove(index);
                    }
                    None => {
                        stack.pop();
                    }
                }
            }
            _ => {}
        }
        if let Some(range) = event_source(&event) {
            last_known = Some(range);
        }
        normalized.push(event);
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConsoleLevel;
    use serde_json::json;

    fn console(ts: f64, source: Option<SourceRange>) -> Event {
        Event::Console {
            ts,
            level: ConsoleLevel::Log,
            args: vec![json!("x")],
            source,
        }
    }

    #[test]
    fn bare_console_gets_a_synthetic_frame() {
        let out = normalize_console_stack_flow(&[
            Event::ScriptStart { ts: 0.0 },
            console(5.0, Some(SourceRange::new(2, 1))),
        ]);
        let tags: Vec<&str> = out.iter().map(Event::tag).collect();
        assert_eq!(
            tags,
            ["SCRIPT_START", "CALLBACK_START", "CONSOLE", "CALLBACK_END"]
        );
        match &out[1] {
            Event::CallbackStart { ts, label, .. } => {
                assert_eq!(*ts, 4.0);
                assert_eq!(label, "sync execution");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn console_inside_a_frame_borrows_its_source() {
        let frame_source = SourceRange::new(3, 5);
        let out = normalize_console_stack_flow(&[
            Event::CallbackStart {
                ts: 1.0,
                task_id: "timers:1".to_string(),
                label: "setTimeout(0)".to_string(),
                source: Some(frame_source),
            },
            console(2.0, None),
            Event::CallbackEnd {
                ts: 3.0,
                task_id: "timers:1".to_string(),
            },
        ]);
        assert_eq!(out.len(), 3);
        assert!(matches!(
            &out[1],
            Event::Console { source: Some(range), .. } if *range == frame_source
        ));
    }

    #[test]
    fn well_formed_traces_pass_through() {
        let events = vec![
            Event::ScriptStart { ts: 0.0 },
            Event::CallbackStart {
                ts: 1.0,
                task_id: "sync-console:1".to_string(),
                label: "sync execution".to_string(),
                source: Some(SourceRange::new(1, 1)),
            },
            console(1.0, Some(SourceRange::new(1, 1))),
            Event::CallbackEnd {
                ts: 1.0,
                task_id: "sync-console:1".to_string(),
            },
            Event::ScriptEnd { ts: 2.0 },
        ];
        assert_eq!(normalize_console_stack_flow(&events), events);
    }
}
