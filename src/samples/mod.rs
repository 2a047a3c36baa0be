//=====================================================
// File: samples/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Bundled example traces
// Objective: Ship hand-authored traces for the classic ordering puzzles so a
//            viewer has something to reduce before any script runs
//=====================================================

use crate::event::{parse_events, Event, ProtocolError};

/// A hand-authored trace plus the script it illustrates.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub id: &'static str,
    pub title: &'static str,
    /// What the trace teaches, one sentence.
    pub learn: &'static str,
    pub code: &'static str,
    trace: &'static str,
}

impl Sample {
    pub fn events(&self) -> Result<Vec<Event>, ProtocolError> {
        parse_events(self.trace)
    }
}

pub const DEFAULT_SAMPLE: &str = "timersVsMicrotasks";

static SAMPLES: [Sample; 6] = [
    Sample {
        id: "timersVsMicrotasks",
        title: "Timers vs microtasks ordering",
        learn: "Promise callbacks drain right after the main script, before the timers phase runs a 0 ms timeout.",
        code: "setTimeout(() => console.log('timeout'), 0);\nPromise.resolve().then(() => console.log('promise'));",
        trace: include_str!("traces/timers_vs_microtasks.json"),
    },
    Sample {
        id: "nextTickVsPromise",
        title: "nextTick priority over Promise",
        learn: "The nextTick queue empties before any promise callback, even one queued earlier.",
        code: "Promise.resolve().then(() => console.log('promise'));\nprocess.nextTick(() => console.log('tick'));",
        trace: include_str!("traces/next_tick_vs_promise.json"),
    },
    Sample {
        id: "immediateVsTimeout",
        title: "setImmediate vs setTimeout(0)",
        learn: "Immediates wait in the check queue, separate from timers; from the main script the winner depends on loop start-up timing.",
        code: "setTimeout(() => console.log('timeout'), 0);\nsetImmediate(() => console.log('immediate'));",
        trace: include_str!("traces/immediate_vs_timeout.json"),
    },
    Sample {
        id: "ioVsImmediate",
        title: "I/O callbacks vs setImmediate",
        learn: "A completed read runs its callback in the poll phase, before the check phase of the same turn.",
        code: "import fs from 'node:fs';\nfs.readFile('a.txt', () => console.log('io'));\nsetImmediate(() => console.log('immediate'));",
        trace: include_str!("traces/io_vs_immediate.json"),
    },
    Sample {
        id: "pendingCallbacks",
        title: "Pending callbacks phase",
        learn: "Deferred system callbacks get their own phase between timers and poll.",
        code: "__queuePendingCallback(() => console.log('pending callback ran'), 'deferred write error');",
        trace: include_str!("traces/pending_callbacks.json"),
    },
    Sample {
        id: "closeHandlers",
        title: "Close handlers",
        learn: "'close' listeners run in the close phase, the last stop of every loop turn.",
        code: "const server = require('net').createServer();\nserver.on('close', () => console.log('closed'));\nserver.close();",
        trace: include_str!("traces/close_handlers.json"),
    },
];

pub fn all() -> &'static [Sample] {
    &SAMPLES
}

pub fn get(id: &str) -> Option<&'static Sample> {
    SAMPLES.iter().find(|sample| sample.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::{create_initial_state, reduce_events};
    use crate::stepper;

    #[test]
    fn every_sample_parses_and_reduces_to_idle() {
        for sample in all() {
            let events = sample
                .events()
                .unwrap_or_else(|err| panic!("{}: {err}", sample.id));
            assert!(events.last().is_some_and(Event::is_script_end), "{}", sample.id);
            let mut state = reduce_events(&events, create_initial_state());
            assert!(state.is_quiescent(), "{} left work behind", sample.id);
            assert!(state.degraded.is_clean(), "{}", sample.id);
            assert!(stepper::advance(&mut state, 4).len() <= 1, "{}", sample.id);
        }
    }

    #[test]
    fn ids_are_unique_and_default_exists() {
        let mut ids: Vec<&str> = all().iter().map(|sample| sample.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all().len());
        assert!(get(DEFAULT_SAMPLE).is_some());
        assert!(all().iter().all(|sample| sample.learn.len() > 10));
    }
}
