use loopscope::event::{Event, FocusBox, Phase, TaskQueue};
use loopscope::harness::{Harness, HarnessOptions};
use loopscope::reducer::{create_initial_state, reduce_events};
use loopscope::runtime::SandboxIo;
use loopscope::samples;
use loopscope::stepper::{advance, tick};

fn sample_prefix(id: &str, len: usize) -> Vec<Event> {
    let mut events = samples::get(id).expect("bundled sample").events().expect("trace parses");
    events.truncate(len);
    events
}

fn started_labels(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::CallbackStart { label, .. } => Some(label.as_str()),
            _ => None,
        })
        .collect()
}

fn ready_timers(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::TimerHeapReady { timer_id, .. } => Some(timer_id.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn stepping_past_the_main_script_drains_microtasks_first() {
    // Cut right after "Main script finished".
    let events = sample_prefix("timersVsMicrotasks", 6);
    let mut state = reduce_events(&events, create_initial_state());
    let synthetic = advance(&mut state, 32);

    assert_eq!(
        started_labels(&synthetic),
        ["Promise.then callback", "setTimeout callback"]
    );
    assert!(synthetic.windows(2).all(|pair| pair[0].ts() < pair[1].ts()));
    assert!(synthetic[0].ts() > events[events.len() - 1].ts());
    assert!(state.degraded.is_clean());
    assert!(state.call_stack.is_empty());
    assert!(state.timer_heap.is_empty());
    assert_eq!(state.phase, None);
    assert_eq!(state.focus.active_box, FocusBox::Idle);
}

#[test]
fn stepping_enters_phases_in_loop_order() {
    let enqueue = |queue, id: &str, ts| Event::EnqueueTask {
        ts,
        queue,
        task_id: id.to_string(),
        label: id.to_string(),
        source: None,
        meta: None,
    };
    let mut state = reduce_events(
        &[
            enqueue(TaskQueue::Close, "close:1", 1.0),
            enqueue(TaskQueue::Check, "check:1", 2.0),
            enqueue(TaskQueue::Io, "poll:1", 3.0),
            enqueue(TaskQueue::Timers, "timers:1", 4.0),
        ],
        create_initial_state(),
    );
    let synthetic = advance(&mut state, 64);
    let entered: Vec<Phase> = synthetic
        .iter()
        .filter_map(|event| match event {
            Event::PhaseEnter { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(entered, [Phase::Timers, Phase::Poll, Phase::Check, Phase::Close]);
    assert!(state.is_quiescent());
    assert!(state.degraded.is_clean());
}

#[test]
fn a_finished_trace_needs_at_most_an_idle_marker() {
    let events = samples::get("closeHandlers")
        .expect("bundled sample")
        .events()
        .expect("trace parses");
    let state = reduce_events(&events, create_initial_state());
    let first = tick(&state);
    assert!(first.len() <= 1);
    let state = reduce_events(&first, state);
    assert!(tick(&state).is_empty());
}

#[test]
fn advance_respects_its_tick_budget() {
    let events = sample_prefix("nextTickVsPromise", 4);
    let mut state = reduce_events(&events, create_initial_state());
    let before = state.timeline.len();
    let synthetic = advance(&mut state, 1);
    assert!(!synthetic.is_empty());
    assert!(synthetic.len() <= 3);
    assert_eq!(state.timeline.len(), before + synthetic.len());
}

#[test]
fn heap_promotes_the_soonest_timer_not_the_first_scheduled() {
    let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
    let control = harness.control();
    let (_, recorded) = harness.run_to_vec(
        "setTimeout(() => console.log('slow'), 100);\nsetTimeout(() => console.log('fast'), 10);",
        &control,
    );
    let real = ready_timers(&recorded);
    assert_eq!(real.len(), 2, "ready: {real:?}");

    let cut = recorded
        .iter()
        .position(|event| matches!(event, Event::TimerHeapReady { .. }))
        .expect("a timer became ready");
    let mut state = reduce_events(&recorded[..cut], create_initial_state());
    assert_eq!(state.timer_heap.len(), 2);

    let synthetic = advance(&mut state, 64);
    assert_eq!(ready_timers(&synthetic), real);
    assert!(state.timer_heap.is_empty());
    assert!(state.degraded.is_clean());
}
