use loopscope::event::{Event, Phase};
use loopscope::reducer::{create_initial_state, reduce_events};
use loopscope::replay::{phase_jump_index, ReplayState};
use loopscope::samples;

fn sample(id: &str) -> Vec<Event> {
    samples::get(id)
        .expect("bundled sample")
        .events()
        .expect("trace parses")
}

#[test]
fn jumping_matches_a_fresh_fold_of_the_prefix() {
    let events = sample("ioVsImmediate");
    let mut replay = ReplayState::new(events.clone());
    for target in [events.len(), 3, events.len() / 2, 0] {
        replay.jump_to(target);
        assert_eq!(replay.pointer(), target);
        assert_eq!(
            replay.state(),
            &reduce_events(&events[..target], create_initial_state()),
            "jump to {target}"
        );
    }
}

#[test]
fn stepping_to_the_end_equals_the_full_fold() {
    let events = sample("pendingCallbacks");
    let mut replay = ReplayState::new(events.clone());
    let mut steps = 0;
    while replay.step_forward() {
        steps += 1;
    }
    assert_eq!(steps, events.len());
    assert!(replay.is_exhausted());
    assert_eq!(
        replay.state(),
        &reduce_events(&events, create_initial_state())
    );
}

#[test]
fn next_phase_walks_through_the_loop() {
    let events = sample("ioVsImmediate");
    let mut replay = ReplayState::new(events.clone());
    let mut visited = Vec::new();
    let mut previous = replay.pointer();
    while !replay.is_exhausted() {
        replay.move_to_next_phase();
        assert!(replay.pointer() > previous, "cursor stalled at {previous}");
        previous = replay.pointer();
        if let Some(Event::PhaseEnter { phase, .. }) = events.get(replay.pointer() - 1) {
            visited.push(*phase);
        }
    }
    assert_eq!(visited, [Phase::Poll, Phase::Check]);
}

#[test]
fn phase_jumps_land_just_inside_the_phase() {
    let events = sample("closeHandlers");
    let index = phase_jump_index(&events, Phase::Close);
    assert!(index > 0);
    let mut replay = ReplayState::new(events);
    replay.jump_to(index);
    assert_eq!(replay.state().phase, Some(Phase::Close));
}

#[test]
fn simulation_continues_a_cut_trace() {
    let mut events = sample("immediateVsTimeout");
    let cut = events
        .iter()
        .position(|event| matches!(event, Event::MicrotaskCheckpoint { detail: Some(detail), .. } if detail == "Main script finished"))
        .expect("main script checkpoint")
        + 1;
    events.truncate(cut);

    let mut replay = ReplayState::new(events);
    replay.jump_to(cut);
    let mut simulated = Vec::new();
    for _ in 0..64 {
        let batch = replay.step_or_simulate();
        if batch.is_empty() {
            break;
        }
        simulated.extend(batch);
    }
    assert_eq!(replay.pointer(), cut);
    let ran: Vec<&str> = simulated
        .iter()
        .filter_map(|event| match event {
            Event::CallbackStart { label, .. } => Some(label.as_str()),
            _ => None,
        })
        .collect();
    // Queued work outranks the timer heap once the recording stops.
    assert_eq!(ran, ["setImmediate callback", "setTimeout callback"]);
    assert!(replay.state().degraded.is_clean());
}
