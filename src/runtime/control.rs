//=====================================================
// File: runtime/control.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Cancellation and deadline control for one run
// Objective: Let the controller cancel a run from another thread and let the
//            interpreter poll a single budget check cheaply
//=====================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a run was stopped from outside the script's own control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Timeout { timeout_ms: u64 },
    Cancelled,
    EventLimit,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout { timeout_ms } => {
                write!(f, "Script execution timed out after {}ms", timeout_ms)
            }
            AbortReason::Cancelled => f.write_str("Script execution was cancelled"),
            AbortReason::EventLimit => f.write_str("Max event limit reached"),
        }
    }
}

/// Shared cancel flag plus the wall-clock deadline of the run.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    deadline: Instant,
    timeout: Duration,
}

impl RunControl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The raw flag, shared with waits that must wake on cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis().min(u128::from(u64::MAX)) as u64
    }

    /// Called on every loop iteration and function call.
    pub fn check(&self) -> Result<(), AbortReason> {
        if self.is_cancelled() {
            return Err(AbortReason::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(AbortReason::Timeout {
                timeout_ms: self.timeout_ms(),
            });
        }
        Ok(())
    }
}
