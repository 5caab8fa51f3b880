//! Push-channel message envelopes.
//!
//! Every envelope carries a `type` tag, an optional payload under `data`,
//! and a send-time ISO-8601 `timestamp`. The enums below are the full
//! protocol surface in both directions; payloads are strongly typed per
//! envelope kind rather than free-form JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TrainState;

/// Server → client envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Single-train delta after a store update.
    TrainPosition {
        data: Box<TrainState>,
        timestamp: DateTime<Utc>,
    },
    /// Full snapshot: on connect and on `get_all_trains`.
    TrainPositions {
        data: Vec<TrainState>,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        data: ErrorBody,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn train_position(state: TrainState) -> Self {
        ServerMessage::TrainPosition {
            data: Box::new(state),
            timestamp: Utc::now(),
        }
    }

    pub fn train_positions(states: Vec<TrainState>) -> Self {
        ServerMessage::TrainPositions {
            data: states,
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: ErrorBody {
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Client → server envelopes.
///
/// Inbound timestamps are advisory; the server tolerates their absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    SubscribeTrain {
        data: TrainRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    UnsubscribeTrain {
        data: TrainRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    GetAllTrains {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRef {
    pub train_id: String,
}

/// Outcome of parsing an inbound text frame.
///
/// The distinction matters to the connection loop: a malformed message
/// (broken JSON, or a known type with a bad payload) earns an `error`
/// envelope, an unrecognized type is only logged. Neither closes the
/// connection.
#[derive(Debug)]
pub enum InboundParse {
    Message(ClientMessage),
    UnknownType(String),
    Malformed(String),
}

/// Message kinds the server acts on. A tag outside this list is ignored;
/// a tag inside it with a payload that fails to parse is malformed.
const KNOWN_CLIENT_TYPES: [&str; 4] =
    ["ping", "subscribe_train", "unsubscribe_train", "get_all_trains"];

/// Parse one inbound push-channel text frame.
pub fn parse_client_message(text: &str) -> InboundParse {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return InboundParse::Malformed(e.to_string()),
    };

    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(msg) => InboundParse::Message(msg),
        Err(e) => match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) if !KNOWN_CLIENT_TYPES.contains(&kind) => {
                InboundParse::UnknownType(kind.to_string())
            }
            _ => InboundParse::Malformed(e.to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrainState;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_server_envelope_shape() {
        let msg = ServerMessage::TrainPosition {
            data: Box::new(TrainState::new("69012".into(), ts())),
            timestamp: ts(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "train_position");
        assert_eq!(json["data"]["id"], "69012");
        // ISO-8601 timestamp string
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-03-01T12:00:00"));
    }

    #[test]
    fn test_snapshot_envelope() {
        let msg = ServerMessage::train_positions(vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "train_positions");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_pong_has_no_data() {
        let json = serde_json::to_value(ServerMessage::pong()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_parse_ping() {
        match parse_client_message(r#"{"type":"ping"}"#) {
            InboundParse::Message(ClientMessage::Ping { .. }) => {}
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_subscribe() {
        let parsed =
            parse_client_message(r#"{"type":"subscribe_train","data":{"trainId":"69012"}}"#);
        match parsed {
            InboundParse::Message(ClientMessage::SubscribeTrain { data, .. }) => {
                assert_eq!(data.train_id, "69012");
            }
            other => panic!("expected subscribe_train, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        match parse_client_message(r#"{"type":"teleport_train","data":{}}"#) {
            InboundParse::UnknownType(kind) => assert_eq!(kind, "teleport_train"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_client_message("not json at all"),
            InboundParse::Malformed(_)
        ));
        assert!(matches!(
            parse_client_message(r#"{"no_type_field":1}"#),
            InboundParse::Malformed(_)
        ));
    }

    #[test]
    fn test_known_type_with_bad_payload_is_malformed() {
        // A recognized type with a broken payload must earn an `error`
        // envelope, so it parses as Malformed, not UnknownType.
        assert!(matches!(
            parse_client_message(r#"{"type":"subscribe_train"}"#),
            InboundParse::Malformed(_)
        ));
        assert!(matches!(
            parse_client_message(r#"{"type":"subscribe_train","data":{"wrong":1}}"#),
            InboundParse::Malformed(_)
        ));
    }

    #[test]
    fn test_client_message_roundtrip() {
        let msg = ClientMessage::SubscribeTrain {
            data: TrainRef {
                train_id: "T1".into(),
            },
            timestamp: Some(ts()),
        };
        let text = serde_json::to_string(&msg).unwrap();
        match parse_client_message(&text) {
            InboundParse::Message(back) => assert_eq!(back, msg),
            other => panic!("got {other:?}"),
        }
    }
}
