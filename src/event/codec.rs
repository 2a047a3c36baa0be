//=====================================================
// File: event/codec.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strict NDJSON transport codec for event streams
// Objective: Encode events one per line and decode them with schema and
//            ordering checks that poison the stream on first violation
//=====================================================

use super::Event;
use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line {line}: malformed event: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: invalid event: {reason}")]
    Invalid { line: usize, reason: String },
    #[error("line {line}: blank record")]
    BlankLine { line: usize },
    #[error("line {line}: out-of-order event ts {ts} after {previous}")]
    OutOfOrder { line: usize, previous: f64, ts: f64 },
    #[error("malformed command: {0}")]
    Command(#[source] serde_json::Error),
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializes one event as a single JSON line (without the trailing newline).
pub fn encode_event(event: &Event) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Writes every event as NDJSON, one record per line.
pub fn write_events<'a, W, I>(mut writer: W, events: I) -> Result<(), ProtocolError>
where
    W: Write,
    I: IntoIterator<Item = &'a Event>,
{
    for event in events {
        let line = encode_event(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Parses a single event record.
pub fn parse_event(input: &str) -> Result<Event, ProtocolError> {
    parse_line(input, 1)
}

/// Parses a JSON array of events, the form bundled traces are authored in.
pub fn parse_events(input: &str) -> Result<Vec<Event>, ProtocolError> {
    let events: Vec<Event> =
        serde_json::from_str(input).map_err(|source| ProtocolError::Malformed { line: 1, source })?;
    for (index, event) in events.iter().enumerate() {
        event
            .check_ranges()
            .map_err(|reason| ProtocolError::Invalid {
                line: index + 1,
                reason,
            })?;
    }
    Ok(events)
}

fn parse_line(input: &str, line: usize) -> Result<Event, ProtocolError> {
    let event: Event =
        serde_json::from_str(input).map_err(|source| ProtocolError::Malformed { line, source })?;
    event
        .check_ranges()
        .map_err(|reason| ProtocolError::Invalid { line, reason })?;
    Ok(event)
}

/// Streaming NDJSON decoder.
///
/// Any failure is fatal: the error is yielded once and the decoder then stops,
/// since ordering guarantees are void after an unparseable record.
pub struct EventDecoder<R> {
    reader: R,
    line: usize,
    last_ts: Option<f64>,
    poisoned: bool,
    buffer: String,
}

impl<R: BufRead> EventDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            last_ts: None,
            poisoned: false,
            buffer: String::new(),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Decodes the whole stream, stopping at the first violation.
    pub fn decode_all(self) -> Result<Vec<Event>, ProtocolError> {
        self.collect()
    }

    fn next_event(&mut self) -> Option<Result<Event, ProtocolError>> {
        self.buffer.clear();
        match self.reader.read_line(&mut self.buffer) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(err) => return Some(Err(err.into())),
        }
        self.line += 1;
        let line = self.line;
        let record = self.buffer.trim_end_matches(['\n', '\r']);
        if record.trim().is_empty() {
            return Some(Err(ProtocolError::BlankLine { line }));
        }
        let event = match parse_line(record, line) {
            Ok(event) => event,
            Err(err) => return Some(Err(err)),
        };
        let ts = event.ts();
        if let Some(previous) = self.last_ts {
            if ts < previous {
                return Some(Err(ProtocolError::OutOfOrder { line, previous, ts }));
            }
        }
        self.last_ts = Some(ts);
        Some(Ok(event))
    }
}

impl<R: BufRead> Iterator for EventDecoder<R> {
    type Item = Result<Event, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            return None;
        }
        let item = self.next_event()?;
        if let Err(err) = &item {
            tracing::warn!(error = %err, "event stream rejected");
            self.poisoned = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decoder_reads_ndjson_records() {
        let input = "{\"type\":\"SCRIPT_START\",\"ts\":1}\n{\"type\":\"SCRIPT_END\",\"ts\":2}\n";
        let events = EventDecoder::new(Cursor::new(input)).decode_all().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_script_end());
    }

    #[test]
    fn decoder_poisons_after_first_error() {
        let input = "{\"type\":\"SCRIPT_START\",\"ts\":1}\nnot json\n{\"type\":\"SCRIPT_END\",\"ts\":2}\n";
        let mut decoder = EventDecoder::new(Cursor::new(input));
        assert!(decoder.next().unwrap().is_ok());
        assert!(matches!(
            decoder.next(),
            Some(Err(ProtocolError::Malformed { line: 2, .. }))
        ));
        assert!(decoder.is_poisoned());
        assert!(decoder.next().is_none());
    }

    #[test]
    fn negative_due_time_is_invalid() {
        let err = parse_event(
            "{\"type\":\"TIMER_HEAP_SCHEDULE\",\"ts\":1,\"timerId\":\"tm:1\",\"label\":\"x\",\"dueInMs\":-4}",
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Invalid { .. }));
    }
}
