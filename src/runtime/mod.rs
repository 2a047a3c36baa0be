//=====================================================
// File: runtime/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host runtime the harness observes
// Objective: Group the clock, run control, id allocation, phase loop and
//            sandboxed I/O
//=====================================================

pub mod clock;
pub mod control;
pub mod event_loop;
pub mod ids;
pub mod io;

pub use clock::{Clock, ClockMode, VirtualClock, WallClock};
pub use control::{AbortReason, RunControl};
pub use event_loop::{EventLoop, Step, MIN_TIMER_DELAY_MS};
pub use ids::IdGenerator;
pub use io::{IoDriver, IoFailure, IoPayload, IoRequest, SandboxIo};
