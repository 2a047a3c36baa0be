//=====================================================
// File: harness/controller.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Run submission and isolation boundary
// Objective: Validate submissions, run each one on a dedicated harness
//            thread and stream its events back over a channel
//=====================================================

use super::{EventHook, Harness, RunOutcome, Termination};
use crate::config::LoopscopeConfig;
use crate::event::{Event, RunCodePayload};
use crate::runtime::RunControl;
use parking_lot::Mutex;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Tree-walking evaluation recurses deeply; the harness thread gets a large stack.
const HARNESS_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("script is {size} bytes, the limit is {limit}")]
    CodeTooLarge { size: usize, limit: usize },
    #[error("a script is already running on this harness")]
    Busy,
    #[error("failed to start the harness thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("the harness thread panicked")]
    WorkerPanicked,
}

/// One script submission; absent limits fall back to the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub code: String,
    pub max_events: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl RunRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            max_events: None,
            timeout_ms: None,
        }
    }
}

impl From<RunCodePayload> for RunRequest {
    fn from(payload: RunCodePayload) -> Self {
        Self {
            code: payload.code,
            max_events: payload.max_events.map(|n| n.get() as usize),
            timeout_ms: payload.timeout_ms.map(|n| n.get()),
        }
    }
}

/// Clears the busy flag when the harness thread finishes, even by panicking.
struct BusyGuard(Arc<Mutex<bool>>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

/// Owns one logical harness: at most one run at a time.
pub struct Controller {
    config: LoopscopeConfig,
    busy: Arc<Mutex<bool>>,
}

impl Controller {
    pub fn new(config: LoopscopeConfig) -> Self {
        Self {
            config,
            busy: Arc::new(Mutex::new(false)),
        }
    }

    pub fn config(&self) -> &LoopscopeConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.lock()
    }

    /// Starts `request` on a fresh harness thread.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, HarnessError> {
        let limit = self.config.limits.max_code_size;
        if request.code.len() > limit {
            tracing::warn!(size = request.code.len(), limit, "run rejected: code too large");
            return Err(HarnessError::CodeTooLarge {
                size: request.code.len(),
                limit,
            });
        }
        {
            let mut busy = self.busy.lock();
            if *busy {
                tracing::warn!("run rejected: harness busy");
                return Err(HarnessError::Busy);
            }
            *busy = true;
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let mut options = self.config.harness_options();
        if let Some(max_events) = request.max_events {
            options.max_events = max_events;
        }
        if let Some(timeout_ms) = request.timeout_ms {
            options.timeout = Duration::from_millis(timeout_ms);
        }
        let control = RunControl::new(options.timeout);
        let worker_control = control.clone();
        let io = self.config.io_driver();
        let (sender, events) = unbounded_channel();
        let code = request.code;
        tracing::info!(
            bytes = code.len(),
            max_events = options.max_events,
            timeout_ms = control.timeout_ms(),
            "run accepted"
        );

        let worker = std::thread::Builder::new()
            .name("loopscope-harness".to_string())
            .stack_size(HARNESS_STACK_SIZE)
            .spawn(move || {
                let mut harness = Harness::new(options, Box::new(io));
                let last_ts = Rc::new(Cell::new(0.0));
                let forward = sender.clone();
                let seen = Rc::clone(&last_ts);
                let hook: EventHook = Box::new(move |event: Event| {
                    seen.set(event.ts());
                    // A closed receiver means the client left; the run is cancelled separately.
                    let _ = forward.send(event);
                });
                let outcome = harness.run(&code, &worker_control, hook);
                if outcome.termination == Termination::EventLimit {
                    let _ = sender.send(Event::ScriptEnd { ts: last_ts.get() });
                }
                // Released before `sender` drops, so a closed stream implies an idle controller.
                drop(guard);
                outcome
            })?;

        Ok(RunHandle {
            events,
            control,
            worker: Some(worker),
        })
    }
}

/// The controller's view of a running script.
///
/// Dropping the handle before the run finished cancels it.
pub struct RunHandle {
    events: UnboundedReceiver<Event>,
    control: RunControl,
    worker: Option<JoinHandle<RunOutcome>>,
}

impl RunHandle {
    /// Next event in emission order; `None` once the stream is complete.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        tracing::info!("run cancelled by controller");
        self.control.cancel();
    }

    /// Drains the stream and waits for the harness thread.
    pub async fn collect(mut self) -> Result<(Vec<Event>, RunOutcome), HarnessError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        let outcome = self.join()?;
        Ok((events, outcome))
    }

    pub fn join(mut self) -> Result<RunOutcome, HarnessError> {
        let worker = self.worker.take().ok_or(HarnessError::WorkerPanicked)?;
        worker.join().map_err(|_| HarnessError::WorkerPanicked)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.worker.as_ref().is_some_and(|worker| !worker.is_finished()) {
            self.control.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new(LoopscopeConfig::default())
    }

    #[tokio::test]
    async fn streams_a_complete_run() {
        let handle = controller().start(RunRequest::new("console.log('hi');")).unwrap();
        let (events, outcome) = handle.collect().await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert!(events.first().is_some_and(|e| e.tag() == "SCRIPT_START"));
        assert!(events.last().is_some_and(Event::is_script_end));
    }

    #[tokio::test]
    async fn event_cap_runs_get_a_closing_script_end() {
        let mut request = RunRequest::new("function spin() { queueMicrotask(spin); } spin();");
        request.max_events = Some(20);
        let (events, outcome) = controller().start(request).unwrap().collect().await.unwrap();
        assert_eq!(outcome.termination, Termination::EventLimit);
        assert_eq!(events.len(), 22);
        assert_eq!(events[events.len() - 2].tag(), "RUNTIME_ERROR");
        assert!(events.last().is_some_and(Event::is_script_end));
    }

    #[tokio::test]
    async fn controller_is_idle_once_a_capped_stream_closes() {
        let controller = controller();
        let mut request = RunRequest::new("function spin() { queueMicrotask(spin); } spin();");
        request.max_events = Some(20);
        let mut handle = controller.start(request).unwrap();
        let mut last = None;
        while let Some(event) = handle.next_event().await {
            last = Some(event);
        }
        assert!(last.is_some_and(|event| event.is_script_end()));
        assert!(!controller.is_busy());

        let next = controller.start(RunRequest::new("console.log('again');")).unwrap();
        let (_, outcome) = next.collect().await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(handle.join().unwrap().termination, Termination::EventLimit);
    }

    #[test]
    fn oversized_code_is_rejected() {
        let mut config = LoopscopeConfig::default();
        config.limits.max_code_size = 4;
        let result = Controller::new(config).start(RunRequest::new("console.log(1)"));
        assert!(matches!(
            result,
            Err(HarnessError::CodeTooLarge { size: 14, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected() {
        // Wall time keeps the first run parked until it is cancelled.
        let mut config = LoopscopeConfig::default();
        config.clock.mode = crate::runtime::ClockMode::Wall;
        let controller = Controller::new(config);
        let first = controller
            .start(RunRequest::new("require('net').createServer().listen(0);"))
            .unwrap();
        assert!(matches!(
            controller.start(RunRequest::new("1")),
            Err(HarnessError::Busy)
        ));
        first.cancel();
        let (_, outcome) = first.collect().await.unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(!controller.is_busy());
    }
}
