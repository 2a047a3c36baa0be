//=====================================================
// File: event/command.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script submission commands
// Objective: Strictly parse the commands a viewer sends to request a run
//=====================================================

use super::ProtocolError;
use serde::{Deserialize, Serialize};
use std::num::{NonZeroU32, NonZeroU64};

/// Only plain script is accepted; other dialects are transpiled before reaching us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Js,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunCodePayload {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<NonZeroU32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<NonZeroU64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub enum ClientCommand {
    Subscribe {},
    RunCode { payload: RunCodePayload },
}

pub fn parse_client_command(input: &str) -> Result<ClientCommand, ProtocolError> {
    serde_json::from_str(input).map_err(ProtocolError::Command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_code_parses_with_optional_limits() {
        let command = parse_client_command(
            r#"{"type":"RUN_CODE","payload":{"code":"1","language":"js","maxEvents":20}}"#,
        )
        .unwrap();
        match command {
            ClientCommand::RunCode { payload } => {
                assert_eq!(payload.code, "1");
                assert_eq!(payload.max_events.map(NonZeroU32::get), Some(20));
                assert!(payload.timeout_ms.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let result = parse_client_command(
            r#"{"type":"RUN_CODE","payload":{"code":"1","language":"ts"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_max_events_is_rejected() {
        let result =
            parse_client_command(r#"{"type":"RUN_CODE","payload":{"code":"1","maxEvents":0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn subscribe_parses() {
        assert_eq!(
            parse_client_command(r#"{"type":"SUBSCRIBE"}"#).unwrap(),
            ClientCommand::Subscribe {}
        );
    }
}
