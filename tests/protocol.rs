use loopscope::event::{
    encode_event, parse_client_command, parse_event, write_events, ClientCommand, Event,
    EventDecoder, Language, ProtocolError,
};
use loopscope::harness::{Harness, HarnessOptions};
use loopscope::runtime::SandboxIo;
use std::io::Cursor;

fn decode(input: &str) -> Vec<Result<Event, ProtocolError>> {
    EventDecoder::new(Cursor::new(input)).collect()
}

#[test]
fn harness_streams_survive_the_wire() {
    let mut harness = Harness::new(HarnessOptions::default(), Box::new(SandboxIo::denied()));
    let control = harness.control();
    let (_, events) = harness.run_to_vec(
        "setTimeout(() => console.log([1, {a: 'b'}]), 3);\nqueueMicrotask(() => {});",
        &control,
    );

    let mut wire = Vec::new();
    write_events(&mut wire, &events).expect("encode");
    let text = String::from_utf8(wire).expect("utf8");
    assert_eq!(text.lines().count(), events.len());

    let decoded = EventDecoder::new(Cursor::new(text.as_str()))
        .decode_all()
        .expect("decode");
    assert_eq!(decoded, events);
}

#[test]
fn wire_keys_are_camel_case_under_a_type_tag() {
    let line = encode_event(&Event::TimerHeapSchedule {
        ts: 4.0,
        timer_id: "tm:1".to_string(),
        label: "setTimeout callback".to_string(),
        due_in_ms: Some(10.0),
        handle_id: Some("h:1".to_string()),
        source: None,
        meta: None,
    })
    .expect("encode");
    let value: serde_json::Value = serde_json::from_str(&line).expect("json");
    assert_eq!(value["type"], "TIMER_HEAP_SCHEDULE");
    assert_eq!(value["timerId"], "tm:1");
    assert_eq!(value["dueInMs"], 10.0);
    assert_eq!(value["handleId"], "h:1");
    assert!(value.get("source").is_none());
    assert!(!line.contains('\n'));
}

#[test]
fn unknown_tags_and_fields_are_rejected() {
    for record in [
        r#"{"type":"SCRIPT_PAUSE","ts":1}"#,
        r#"{"type":"SCRIPT_START","ts":1,"extra":true}"#,
        r#"{"ts":1}"#,
        r#"{"type":"DEQUEUE_TASK","ts":1,"queue":"idle","taskId":"x"}"#,
        r#"{"type":"CONSOLE","ts":1,"level":"log","args":[],"source":{"line":0,"col":1}}"#,
    ] {
        assert!(
            matches!(parse_event(record), Err(ProtocolError::Malformed { .. })),
            "accepted: {record}"
        );
    }
}

#[test]
fn legacy_io_queue_name_is_accepted() {
    let event = parse_event(r#"{"type":"ENQUEUE_TASK","ts":1,"queue":"io","taskId":"poll:1","label":"read"}"#)
        .expect("io is a valid queue name");
    assert_eq!(event.tag(), "ENQUEUE_TASK");
}

#[test]
fn out_of_order_timestamps_poison_the_stream() {
    let results = decode(
        "{\"type\":\"SCRIPT_START\",\"ts\":5}\n\
         {\"type\":\"SCRIPT_END\",\"ts\":3}\n\
         {\"type\":\"SCRIPT_START\",\"ts\":9}\n",
    );
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(ProtocolError::OutOfOrder { line: 2, .. })
    ));
}

#[test]
fn equal_timestamps_are_in_order() {
    let results = decode("{\"type\":\"SCRIPT_START\",\"ts\":5}\n{\"type\":\"SCRIPT_END\",\"ts\":5}\n");
    assert!(results.iter().all(Result::is_ok));
}

#[test]
fn blank_records_are_errors() {
    let results = decode("{\"type\":\"SCRIPT_START\",\"ts\":1}\n\n{\"type\":\"SCRIPT_END\",\"ts\":2}\n");
    assert!(matches!(
        results.last(),
        Some(Err(ProtocolError::BlankLine { line: 2 }))
    ));
}

#[test]
fn run_code_commands_are_strict() {
    match parse_client_command(r#"{"type":"RUN_CODE","payload":{"code":"x","timeoutMs":250}}"#) {
        Ok(ClientCommand::RunCode { payload }) => {
            assert_eq!(payload.language, None);
            assert_eq!(payload.timeout_ms.map(|ms| ms.get()), Some(250));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        parse_client_command(r#"{"type":"RUN_CODE","payload":{"code":"x","language":"js"}}"#),
        Ok(ClientCommand::RunCode { payload }) if payload.language == Some(Language::Js)
    ));
    for rejected in [
        r#"{"type":"RUN_CODE","payload":{"code":"x","debug":true}}"#,
        r#"{"type":"RUN_CODE","payload":{}}"#,
        r#"{"type":"RUN_CODE"}"#,
        r#"{"type":"STOP"}"#,
    ] {
        assert!(
            matches!(parse_client_command(rejected), Err(ProtocolError::Command(_))),
            "accepted: {rejected}"
        );
    }
}
