//=====================================================
// File: harness/sink.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Bounded event output for one harness run
// Objective: Forward events to a hook until the event cap is reached, then
//            emit the single terminal error and go quiet
//=====================================================

use crate::event::Event;
use crate::runtime::AbortReason;
use std::cell::RefCell;
use std::rc::Rc;

/// Receives every event the harness emits, in order.
pub type EventHook = Box<dyn FnMut(Event)>;

pub struct EventSink {
    hook: EventHook,
    max_events: usize,
    emitted: usize,
    halted: bool,
}

impl EventSink {
    pub fn new(max_events: usize, hook: EventHook) -> Self {
        Self {
            hook,
            max_events,
            emitted: 0,
            halted: false,
        }
    }

    /// Emits `event`, or replaces it with the cap error once `max_events`
    /// records have gone out. Every later call is dropped.
    pub fn emit(&mut self, event: Event) -> Result<(), AbortReason> {
        if self.halted {
            return Err(AbortReason::EventLimit);
        }
        if self.emitted >= self.max_events {
            self.halted = true;
            tracing::warn!(max_events = self.max_events, "event cap reached, halting run");
            (self.hook)(Event::RuntimeError {
                ts: event.ts(),
                message: AbortReason::EventLimit.to_string(),
                stack: None,
            });
            self.emitted += 1;
            return Err(AbortReason::EventLimit);
        }
        (self.hook)(event);
        self.emitted += 1;
        Ok(())
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

/// Collects emitted events in memory; used by `Harness::run_to_vec` and tests.
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Rc<RefCell<Vec<Event>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook(&self) -> EventHook {
        let events = Rc::clone(&self.events);
        Box::new(move |event| events.borrow_mut().push(event))
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_replaces_the_overflowing_event_with_one_error() {
        let collector = EventCollector::new();
        let mut sink = EventSink::new(2, collector.hook());
        assert!(sink.emit(Event::ScriptStart { ts: 0.0 }).is_ok());
        assert!(sink.emit(Event::DrainMicrotasksStart { ts: 1.0 }).is_ok());
        assert_eq!(
            sink.emit(Event::DrainMicrotasksEnd { ts: 2.0 }),
            Err(AbortReason::EventLimit)
        );
        assert_eq!(
            sink.emit(Event::ScriptEnd { ts: 3.0 }),
            Err(AbortReason::EventLimit)
        );

        let events = collector.take();
        assert_eq!(events.len(), 3);
        match events.last() {
            Some(Event::RuntimeError { message, .. }) => {
                assert_eq!(message, "Max event limit reached")
            }
            other => panic!("expected the cap error, got {other:?}"),
        }
        assert!(sink.is_halted());
        assert_eq!(sink.emitted(), 3);
    }
}
