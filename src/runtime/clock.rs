//=====================================================
// File: runtime/clock.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Time sources for the host event loop
// Objective: Provide a deterministic virtual clock for reproducible traces and
//            a monotonic wall clock for live runs
//=====================================================

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Which time source a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    #[default]
    Virtual,
    Wall,
}

impl ClockMode {
    pub fn build(self) -> Box<dyn Clock> {
        match self {
            ClockMode::Virtual => Box::new(VirtualClock::default()),
            ClockMode::Wall => Box::new(WallClock::new()),
        }
    }
}

impl std::str::FromStr for ClockMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "virtual" => Ok(ClockMode::Virtual),
            "wall" => Ok(ClockMode::Wall),
            other => Err(format!("unknown clock mode '{other}' (expected virtual|wall)")),
        }
    }
}

pub trait Clock {
    /// Milliseconds on this clock's own monotonic timeline.
    fn now_ms(&self) -> u64;

    /// Blocks until `deadline_ms`, returning early once `interrupted` reports true.
    fn wait_until(&mut self, deadline_ms: u64, interrupted: &dyn Fn() -> bool);
}

/// Deterministic clock: time only moves when the loop waits, and it jumps.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_ms: u64,
}

impl VirtualClock {
    pub fn starting_at(now_ms: u64) -> Self {
        Self { now_ms }
    }

    pub fn advance(&mut self, by: Duration) {
        let ms = by.as_millis().min(u128::from(u64::MAX)) as u64;
        self.now_ms = self.now_ms.saturating_add(ms);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn wait_until(&mut self, deadline_ms: u64, _interrupted: &dyn Fn() -> bool) {
        self.now_ms = self.now_ms.max(deadline_ms);
    }
}

/// Monotonic clock anchored at the wall-clock epoch time it was created.
#[derive(Debug, Clone)]
pub struct WallClock {
    started: Instant,
    epoch_ms: u64,
}

const WAIT_SLICE: Duration = Duration::from_millis(5);

impl WallClock {
    pub fn new() -> Self {
        let epoch_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self {
            started: Instant::now(),
            epoch_ms,
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now_ms(&self) -> u64 {
        let elapsed = self.started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        self.epoch_ms.saturating_add(elapsed)
    }

    fn wait_until(&mut self, deadline_ms: u64, interrupted: &dyn Fn() -> bool) {
        loop {
            let now = self.now_ms();
            if now >= deadline_ms || interrupted() {
                return;
            }
            let remaining = Duration::from_millis(deadline_ms - now);
            std::thread::sleep(remaining.min(WAIT_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_jumps_to_deadline() {
        let mut clock = VirtualClock::default();
        clock.wait_until(250, &|| false);
        assert_eq!(clock.now_ms(), 250);
        clock.wait_until(100, &|| false);
        assert_eq!(clock.now_ms(), 250);
    }

    #[test]
    fn wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_wait_stops_when_interrupted() {
        let mut clock = WallClock::new();
        let target = clock.now_ms() + 60_000;
        let started = Instant::now();
        clock.wait_until(target, &|| true);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn clock_mode_parses() {
        assert_eq!("Wall".parse::<ClockMode>().unwrap(), ClockMode::Wall);
        assert!("sundial".parse::<ClockMode>().is_err());
    }
}
