use loopscope::event::{Event, Phase, TaskQueue};
use loopscope::harness::{Harness, HarnessOptions};
use loopscope::reducer::{create_initial_state, reduce_events, VisualizerState};
use loopscope::runtime::SandboxIo;
use loopscope::samples;

const SCRIPT: &str = "\
setTimeout(() => console.log('timeout'), 0);
setImmediate(() => console.log('immediate'));
Promise.resolve().then(() => console.log('promise'));
process.nextTick(() => console.log('tick'));
__queuePendingCallback(() => console.log('pending'), 'deferred write');
fs.readFile('missing.txt', (err) => console.warn(err));
";

fn harness_trace(code: &str) -> Vec<Event> {
    let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
    let control = harness.control();
    harness.run_to_vec(code, &control).1
}

fn fold(events: &[Event]) -> VisualizerState {
    reduce_events(events, create_initial_state())
}

#[test]
fn folding_is_deterministic() {
    let events = harness_trace(SCRIPT);
    assert_eq!(fold(&events), fold(&events));
}

#[test]
fn folding_a_split_trace_matches_a_single_pass() {
    let events = harness_trace(SCRIPT);
    let whole = fold(&events);
    for split in [0, 1, events.len() / 3, events.len() / 2, events.len()] {
        let (head, tail) = events.split_at(split);
        let resumed = reduce_events(tail, fold(head));
        assert_eq!(resumed, whole, "split at {split}");
    }
}

#[test]
fn harness_traces_fold_without_fallbacks() {
    let events = harness_trace(SCRIPT);
    let state = fold(&events);
    assert!(state.degraded.is_clean(), "degraded: {:?}", state.degraded);
    assert!(state.is_quiescent());
    assert!(!state.is_running);
    assert_eq!(state.timeline.len(), events.len());
    assert_eq!(state.logs.len(), 6);
}

#[test]
fn io_and_poll_name_the_same_queue() {
    let enqueue = |queue, id: &str, ts| Event::EnqueueTask {
        ts,
        queue,
        task_id: id.to_string(),
        label: "read".to_string(),
        source: None,
        meta: None,
    };
    let state = fold(&[
        enqueue(TaskQueue::Io, "a", 1.0),
        enqueue(TaskQueue::Poll, "b", 2.0),
        enqueue(TaskQueue::Poll, "a", 3.0),
    ]);
    let ids: Vec<&str> = state.queues.poll.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert_eq!(state.queues.io, state.queues.poll);

    let state = reduce_events(
        &[Event::DequeueTask {
            ts: 4.0,
            queue: TaskQueue::Io,
            task_id: "b".to_string(),
        }],
        state,
    );
    assert_eq!(state.queues.task(Phase::Poll).len(), 1);
    assert_eq!(state.queues.io.len(), 1);
    assert!(state.degraded.is_clean());
}

#[test]
fn unmatched_ids_are_counted_not_dropped() {
    let state = fold(&[
        Event::CallbackStart {
            ts: 1.0,
            task_id: "a".to_string(),
            label: "outer".to_string(),
            source: None,
        },
        Event::CallbackEnd {
            ts: 2.0,
            task_id: "ghost".to_string(),
        },
        Event::DequeueTask {
            ts: 3.0,
            queue: TaskQueue::Check,
            task_id: "nothing".to_string(),
        },
    ]);
    assert!(state.call_stack.is_empty());
    assert_eq!(state.degraded.unmatched_callback_end, 1);
    assert_eq!(state.degraded.unmatched_dequeue_task, 1);
    assert_eq!(state.active_task_id.as_deref(), Some("nothing"));
    assert_eq!(state.timeline.len(), 3);
}

#[test]
fn bundled_samples_reduce_like_harness_traces() {
    for sample in samples::all() {
        let events = sample.events().expect("bundled trace parses");
        let state = fold(&events);
        assert!(state.is_quiescent(), "{}", sample.id);
        assert!(!state.logs.is_empty(), "{} printed nothing", sample.id);
    }
}
