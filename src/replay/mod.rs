//=====================================================
// File: replay/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Trace scrubbing
// Objective: Move a cursor over a recorded trace, re-folding from the seed
//            on jumps, and hand over to the stepper past the end
//=====================================================

use crate::event::{Event, Phase};
use crate::reducer::{create_initial_state, VisualizerState};
use crate::stepper;

/// A recorded trace plus the state folded from its first `pointer` events.
#[derive(Debug, Clone)]
pub struct ReplayState {
    events: Vec<Event>,
    pointer: usize,
    state: VisualizerState,
}

impl ReplayState {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            pointer: 0,
            state: create_initial_state(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn state(&self) -> &VisualizerState {
        &self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.pointer >= self.events.len()
    }

    /// Folds the next recorded event; returns false at the end of the trace.
    pub fn step_forward(&mut self) -> bool {
        match self.events.get(self.pointer) {
            Some(event) => {
                self.state.apply(event);
                self.pointer += 1;
                true
            }
            None => false,
        }
    }

    /// Re-folds from the seed up to `pointer`, clamped to the trace length.
    pub fn jump_to(&mut self, pointer: usize) {
        let target = pointer.min(self.events.len());
        self.state = create_initial_state();
        self.pointer = 0;
        while self.pointer < target {
            self.step_forward();
        }
    }

    /// Steps until a `PHASE_ENTER` for a different phase than the current one.
    ///
    /// Re-entering the current phase keeps going; with no further phase change
    /// in the trace the cursor advances by a single event instead.
    pub fn move_to_next_phase(&mut self) {
        if self.is_exhausted() {
            return;
        }
        let current = self.state.phase;
        let origin = (self.pointer, self.state.clone());
        let mut entered_any = false;

        while let Some(event) = self.events.get(self.pointer) {
            let entered = match event {
                Event::PhaseEnter { phase, .. } => Some(*phase),
                _ => None,
            };
            self.step_forward();
            match (entered, current) {
                (Some(_), None) => return,
                (Some(phase), Some(current)) if phase != current => return,
                (Some(_), Some(_)) => entered_any = true,
                (None, _) => {}
            }
        }

        if !entered_any {
            (self.pointer, self.state) = origin;
            self.step_forward();
        }
    }

    /// Folds the next recorded event, or the stepper's next batch once the
    /// trace is exhausted. Returns the events that were applied.
    pub fn step_or_simulate(&mut self) -> Vec<Event> {
        if let Some(event) = self.events.get(self.pointer).cloned() {
            self.step_forward();
            return vec![event];
        }
        let batch = stepper::tick(&self.state);
        for event in &batch {
            self.state.apply(event);
        }
        batch
    }
}

/// Pointer just past the first `PHASE_ENTER` for `phase`, or 0 when it never occurs.
pub fn phase_jump_index(events: &[Event], phase: Phase) -> usize {
    events
        .iter()
        .position(|event| matches!(event, Event::PhaseEnter { phase: p, .. } if *p == phase))
        .map_or(0, |index| index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> Vec<Event> {
        vec![
            Event::ScriptStart { ts: 0.0 },
            Event::PhaseEnter {
                ts: 1.0,
                phase: Phase::Timers,
            },
            Event::PhaseExit {
                ts: 2.0,
                phase: Phase::Timers,
            },
            Event::PhaseEnter {
                ts: 3.0,
                phase: Phase::Check,
            },
            Event::PhaseExit {
                ts: 4.0,
                phase: Phase::Check,
            },
            Event::ScriptEnd { ts: 5.0 },
        ]
    }

    #[test]
    fn jump_is_clamped_and_refolds() {
        let mut replay = ReplayState::new(trace());
        replay.jump_to(99);
        assert_eq!(replay.pointer(), 6);
        assert!(!replay.state().is_running);
        replay.jump_to(2);
        assert_eq!(replay.pointer(), 2);
        assert_eq!(replay.state().phase, Some(Phase::Timers));
        assert_eq!(replay.state().timeline.len(), 2);
    }

    #[test]
    fn next_phase_stops_after_the_phase_change() {
        let mut replay = ReplayState::new(trace());
        replay.move_to_next_phase();
        assert_eq!(replay.pointer(), 2);
        replay.move_to_next_phase();
        assert_eq!(replay.pointer(), 4);
        assert_eq!(replay.state().phase, Some(Phase::Check));
    }

    #[test]
    fn phase_jump_index_points_past_the_enter() {
        assert_eq!(phase_jump_index(&trace(), Phase::Check), 4);
        assert_eq!(phase_jump_index(&trace(), Phase::Close), 0);
    }

    #[test]
    fn simulation_takes_over_at_the_end() {
        let mut replay = ReplayState::new(vec![Event::FocusSet {
            ts: 1.0,
            focus: crate::event::FocusPatch {
                active_box: Some(crate::event::FocusBox::Code),
                ..Default::default()
            },
        }]);
        assert_eq!(replay.step_or_simulate().len(), 1);
        let synthetic = replay.step_or_simulate();
        assert_eq!(synthetic.len(), 1);
        assert_eq!(synthetic[0].tag(), "FOCUS_SET");
        assert!(replay.step_or_simulate().is_empty());
        assert_eq!(replay.pointer(), 1);
    }
}
