//=====================================================
// File: runtime/event_loop.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Phase-structured host event loop
// Objective: Own the timer heap, phase queues and microtask queues, and hand
//            the driver one scheduling step at a time in real loop order
//=====================================================

//=============================================
//            Section 1: Imports & Step Types
//=============================================

use super::clock::Clock;
use crate::event::{MicrotaskQueue, Phase};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Smallest delay a timer can be armed with, mirroring the host's 1ms clamp.
pub const MIN_TIMER_DELAY_MS: u64 = 1;

/// One unit of loop progress handed to the driver.
#[derive(Debug, PartialEq)]
pub enum Step<T> {
    /// A microtask is due; `nextTick` always before `promise`.
    Microtask { queue: MicrotaskQueue, payload: T },
    /// A macrotask from `phase` is due. `key` is the loop-level entry id.
    Task { phase: Phase, key: u64, payload: T },
    /// The phase ran at least one task and its snapshot is exhausted.
    PhaseExit(Phase),
    /// Nothing is runnable until the next timer deadline.
    PollWaitStart { timeout_ms: u64, deadline_ms: u64 },
    PollWaitEnd,
    /// Only referenced handles keep the loop alive; nothing can ever run.
    Blocked,
    /// The loop has no remaining work.
    Idle,
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Start,
    Running {
        phase: Phase,
        limit: u64,
        now: u64,
        dispatched: bool,
    },
    PollWait {
        deadline: u64,
    },
    Waiting {
        deadline: u64,
    },
}

struct TimerSlot<T> {
    payload: T,
    interval: Option<u64>,
    generation: u64,
    armed: bool,
}

//=============================================
//            Section 2: Event Loop State
//=============================================

/// A libuv-style loop, generic over the payload its driver attaches to callbacks.
pub struct EventLoop<T> {
    clock: Box<dyn Clock>,
    interrupt: Arc<AtomicBool>,
    next_key: u64,
    timers: HashMap<u64, TimerSlot<T>>,
    heap: BinaryHeap<Reverse<(u64, u64, u64)>>,
    pending: VecDeque<(u64, T)>,
    requests: VecDeque<(u64, T)>,
    immediates: VecDeque<(u64, T)>,
    closing: VecDeque<(u64, T)>,
    next_tick: VecDeque<T>,
    promise: VecDeque<T>,
    refs: BTreeSet<u64>,
    cursor: Cursor,
}

impl<T: Clone> EventLoop<T> {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            interrupt: Arc::new(AtomicBool::new(false)),
            next_key: 1,
            timers: HashMap::new(),
            heap: BinaryHeap::new(),
            pending: VecDeque::new(),
            requests: VecDeque::new(),
            immediates: VecDeque::new(),
            closing: VecDeque::new(),
            next_tick: VecDeque::new(),
            promise: VecDeque::new(),
            refs: BTreeSet::new(),
            cursor: Cursor::Start,
        }
    }

    /// Shares a flag that cuts any poll wait short once set.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn allocate_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    //=============================================
    //            Section 3: Scheduling Surface
    //=============================================

    /// Arms a one-shot or repeating timer. Returns the loop key and the clamped delay.
    pub fn add_timer(&mut self, delay_ms: u64, repeat: bool, payload: T) -> (u64, u64) {
        let delay = delay_ms.max(MIN_TIMER_DELAY_MS);
        let key = self.allocate_key();
        let generation = self.allocate_key();
        let deadline = self.now().saturating_add(delay);
        self.timers.insert(
            key,
            TimerSlot {
                payload,
                interval: repeat.then_some(delay),
                generation,
                armed: true,
            },
        );
        self.heap.push(Reverse((deadline, generation, key)));
        (key, delay)
    }

    /// Re-arms a repeating timer after its callback ran. `None` once it was cancelled.
    pub fn rearm(&mut self, key: u64) -> Option<u64> {
        let generation = self.allocate_key();
        let now = self.now();
        let slot = self.timers.get_mut(&key)?;
        let interval = slot.interval?;
        slot.generation = generation;
        slot.armed = true;
        self.heap
            .push(Reverse((now.saturating_add(interval), generation, key)));
        Some(interval)
    }

    /// Cancels a timer; stale heap entries are discarded lazily.
    pub fn cancel_timer(&mut self, key: u64) -> bool {
        self.timers.remove(&key).is_some()
    }

    pub fn add_immediate(&mut self, payload: T) -> u64 {
        let key = self.allocate_key();
        self.immediates.push_back((key, payload));
        key
    }

    pub fn cancel_immediate(&mut self, key: u64) -> bool {
        remove_keyed(&mut self.immediates, key)
    }

    pub fn add_pending(&mut self, payload: T) -> u64 {
        let key = self.allocate_key();
        self.pending.push_back((key, payload));
        key
    }

    /// Starts an in-flight request; it completes during a later poll phase.
    pub fn add_request(&mut self, payload: T) -> u64 {
        let key = self.allocate_key();
        self.requests.push_back((key, payload));
        key
    }

    pub fn add_close(&mut self, payload: T) -> u64 {
        let key = self.allocate_key();
        self.closing.push_back((key, payload));
        key
    }

    pub fn queue_microtask(&mut self, queue: MicrotaskQueue, payload: T) {
        match queue {
            MicrotaskQueue::NextTick => self.next_tick.push_back(payload),
            MicrotaskQueue::Promise => self.promise.push_back(payload),
        }
    }

    /// Marks a long-lived handle (a listening socket) as keeping the loop alive.
    pub fn ref_handle(&mut self) -> u64 {
        let key = self.allocate_key();
        self.refs.insert(key);
        key
    }

    pub fn unref_handle(&mut self, key: u64) -> bool {
        self.refs.remove(&key)
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn in_flight_requests(&self) -> usize {
        self.requests.len()
    }

    /// True when anything at all could still run or keep the loop alive.
    pub fn is_alive(&self) -> bool {
        self.has_runnable_work() || !self.refs.is_empty()
    }

    fn has_runnable_work(&self) -> bool {
        !self.timers.is_empty()
            || !self.immediates.is_empty()
            || !self.pending.is_empty()
            || !self.closing.is_empty()
            || !self.requests.is_empty()
            || !self.next_tick.is_empty()
            || !self.promise.is_empty()
    }

    /// Drops every queued callback and handle, used on teardown.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.heap.clear();
        self.pending.clear();
        self.requests.clear();
        self.immediates.clear();
        self.closing.clear();
        self.next_tick.clear();
        self.promise.clear();
        self.refs.clear();
        self.cursor = Cursor::Start;
    }

    /// Earliest live timer deadline, discarding cancelled heap entries on the way.
    pub fn next_deadline(&mut self) -> Option<u64> {
        while let Some(Reverse((deadline, generation, key))) = self.heap.peek().copied() {
            if self.is_live_entry(generation, key) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Waits on the clock until `deadline_ms` or until the interrupt is raised.
    pub fn park_until(&mut self, deadline_ms: u64) {
        let interrupt = Arc::clone(&self.interrupt);
        self.clock
            .wait_until(deadline_ms, &move || interrupt.load(Ordering::Relaxed));
    }

    fn is_live_entry(&self, generation: u64, key: u64) -> bool {
        self.timers
            .get(&key)
            .is_some_and(|slot| slot.armed && slot.generation == generation)
    }

    //=============================================
    //            Section 4: Stepping
    //=============================================

    /// Advances the loop by exactly one observable step.
    ///
    /// Microtasks are always handed out first, re-checked after each one, so a
    /// `nextTick` queued by a promise job still runs before the next promise job.
    pub fn next_step(&mut self) -> Step<T> {
        if let Some(payload) = self.next_tick.pop_front() {
            return Step::Microtask {
                queue: MicrotaskQueue::NextTick,
                payload,
            };
        }
        if let Some(payload) = self.promise.pop_front() {
            return Step::Microtask {
                queue: MicrotaskQueue::Promise,
                payload,
            };
        }

        loop {
            match self.cursor {
                Cursor::Start => {
                    if !self.has_runnable_work() {
                        return if self.refs.is_empty() {
                            Step::Idle
                        } else {
                            Step::Blocked
                        };
                    }
                    let now = self.now();
                    self.cursor = self.enter(Phase::Timers, now);
                }
                Cursor::Running {
                    phase,
                    limit,
                    now,
                    dispatched,
                } => {
                    if let Some((key, payload)) = self.take_next(phase, limit, now) {
                        self.cursor = Cursor::Running {
                            phase,
                            limit,
                            now,
                            dispatched: true,
                        };
                        return Step::Task {
                            phase,
                            key,
                            payload,
                        };
                    }
                    self.cursor = self.after(phase, now);
                    if dispatched {
                        return Step::PhaseExit(phase);
                    }
                }
                Cursor::PollWait { deadline } => {
                    self.cursor = Cursor::Waiting { deadline };
                    let timeout_ms = deadline.saturating_sub(self.now());
                    return Step::PollWaitStart {
                        timeout_ms,
                        deadline_ms: deadline,
                    };
                }
                Cursor::Waiting { deadline } => {
                    let interrupt = Arc::clone(&self.interrupt);
                    self.clock
                        .wait_until(deadline, &move || interrupt.load(Ordering::Relaxed));
                    let now = self.now();
                    self.cursor = self.enter(Phase::Check, now);
                    return Step::PollWaitEnd;
                }
            }
        }
    }

    fn enter(&self, phase: Phase, now: u64) -> Cursor {
        Cursor::Running {
            phase,
            limit: self.next_key,
            now,
            dispatched: false,
        }
    }

    fn after(&mut self, phase: Phase, now: u64) -> Cursor {
        match phase {
            Phase::Timers => self.enter(Phase::Pending, now),
            Phase::Pending => self.enter(Phase::Poll, now),
            Phase::Poll => match self.poll_deadline() {
                Some(deadline) => Cursor::PollWait { deadline },
                None => self.enter(Phase::Check, now),
            },
            Phase::Check => self.enter(Phase::Close, now),
            Phase::Close => Cursor::Start,
        }
    }

    /// The poll phase only blocks when timers are the sole remaining work.
    fn poll_deadline(&mut self) -> Option<u64> {
        let idle = self.immediates.is_empty()
            && self.pending.is_empty()
            && self.closing.is_empty()
            && self.requests.is_empty()
            && self.next_tick.is_empty()
            && self.promise.is_empty();
        if !idle {
            return None;
        }
        let deadline = self.next_deadline()?;
        (deadline > self.now()).then_some(deadline)
    }

    fn take_next(&mut self, phase: Phase, limit: u64, now: u64) -> Option<(u64, T)> {
        match phase {
            Phase::Timers => self.take_due_timer(now),
            Phase::Pending => take_before(&mut self.pending, limit),
            Phase::Poll => take_before(&mut self.requests, limit),
            Phase::Check => take_before(&mut self.immediates, limit),
            Phase::Close => take_before(&mut self.closing, limit),
        }
    }

    fn take_due_timer(&mut self, now: u64) -> Option<(u64, T)> {
        let deadline = self.next_deadline()?;
        if deadline > now {
            return None;
        }
        let Reverse((_, _, key)) = self.heap.pop()?;
        let repeating = self.timers.get(&key)?.interval.is_some();
        if repeating {
            let slot = self.timers.get_mut(&key)?;
            slot.armed = false;
            Some((key, slot.payload.clone()))
        } else {
            self.timers.remove(&key).map(|slot| (key, slot.payload))
        }
    }
}

/// Pops the front entry only if it was queued before the phase snapshot.
fn take_before<T>(queue: &mut VecDeque<(u64, T)>, limit: u64) -> Option<(u64, T)> {
    match queue.front() {
        Some((key, _)) if *key < limit => queue.pop_front(),
        _ => None,
    }
}

fn remove_keyed<T>(queue: &mut VecDeque<(u64, T)>, key: u64) -> bool {
    match queue.iter().position(|(k, _)| *k == key) {
        Some(index) => queue.remove(index).is_some(),
        None => false,
    }
}

//=============================================/*
//  A pull-driven loop: the driver calls next_step() and performs whatever the
//  returned step describes, so the order it observes is the loop's own order.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::clock::VirtualClock;

    fn looped() -> EventLoop<&'static str> {
        EventLoop::new(Box::new(VirtualClock::default()))
    }

    fn drain(ev: &mut EventLoop<&'static str>) -> Vec<String> {
        let mut seen = Vec::new();
        for _ in 0..64 {
            match ev.next_step() {
                Step::Microtask { payload, .. } => seen.push(format!("micro:{payload}")),
                Step::Task { phase, payload, .. } => seen.push(format!("{phase}:{payload}")),
                Step::PhaseExit(phase) => seen.push(format!("exit:{phase}")),
                Step::PollWaitStart { timeout_ms, .. } => seen.push(format!("wait:{timeout_ms}")),
                Step::PollWaitEnd => seen.push("wake".into()),
                Step::Blocked => {
                    seen.push("blocked".into());
                    break;
                }
                Step::Idle => break,
            }
        }
        seen
    }

    #[test]
    fn next_tick_runs_before_promise() {
        let mut ev = looped();
        ev.queue_microtask(MicrotaskQueue::Promise, "p");
        ev.queue_microtask(MicrotaskQueue::NextTick, "n");
        assert_eq!(drain(&mut ev), ["micro:n", "micro:p"]);
    }

    #[test]
    fn immediate_runs_before_zero_delay_timer_on_virtual_clock() {
        let mut ev = looped();
        ev.add_timer(0, false, "t");
        ev.add_immediate("i");
        assert_eq!(
            drain(&mut ev),
            ["check:i", "exit:check", "wait:1", "wake", "timers:t", "exit:timers"]
        );
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut ev = looped();
        let (key, _) = ev.add_timer(10, false, "t");
        assert!(ev.cancel_timer(key));
        assert!(drain(&mut ev).is_empty());
    }

    #[test]
    fn interval_rearms_until_cancelled() {
        let mut ev = looped();
        let (key, delay) = ev.add_timer(5, true, "iv");
        assert_eq!(delay, 5);
        let mut fired = 0;
        for _ in 0..32 {
            match ev.next_step() {
                Step::Task { key: k, .. } => {
                    fired += 1;
                    if fired == 3 {
                        ev.cancel_timer(k);
                    } else {
                        assert_eq!(ev.rearm(k), Some(5));
                    }
                }
                Step::Idle => break,
                _ => {}
            }
        }
        assert_eq!(fired, 3);
        assert!(ev.rearm(key).is_none());
    }

    #[test]
    fn immediates_queued_during_check_run_next_iteration() {
        let mut ev = looped();
        ev.add_immediate("a");
        let mut order = Vec::new();
        for _ in 0..16 {
            match ev.next_step() {
                Step::Task { payload, .. } => {
                    order.push(payload);
                    if payload == "a" {
                        ev.add_immediate("b");
                    }
                }
                Step::PhaseExit(_) => order.push("exit"),
                Step::Idle => break,
                _ => {}
            }
        }
        assert_eq!(order, ["a", "exit", "b", "exit"]);
    }

    #[test]
    fn requests_complete_in_poll_before_check() {
        let mut ev = looped();
        ev.add_immediate("i");
        ev.add_request("io");
        assert_eq!(
            drain(&mut ev),
            ["poll:io", "exit:poll", "check:i", "exit:check"]
        );
    }

    #[test]
    fn referenced_handle_alone_blocks() {
        let mut ev = looped();
        let key = ev.ref_handle();
        assert_eq!(drain(&mut ev), ["blocked"]);
        ev.unref_handle(key);
        assert_eq!(ev.next_step(), Step::Idle);
    }

    #[test]
    fn phases_follow_fixed_order() {
        let mut ev = looped();
        ev.add_close("c");
        ev.add_immediate("i");
        ev.add_pending("p");
        assert_eq!(
            drain(&mut ev),
            ["pending:p", "exit:pending", "check:i", "exit:check", "close:c", "exit:close"]
        );
    }
}
