use serde::Serialize;
use serde_json::Value;

use crate::patch::GamePatch;
use crate::server_utils::normalize_code;
use crate::types::GameDoc;

#[derive(Debug)]
pub enum ParsedClientMessage {
    Create { doc: Box<GameDoc> },
    Get { code: String },
    Subscribe { code: String },
    Unsubscribe { code: String },
    Update { code: String, patch: Box<GamePatch> },
    Ping { t: f64 },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "create" => {
            let doc: GameDoc = serde_json::from_value(object.get("doc")?.clone()).ok()?;
            normalize_code(&doc.code)?;
            Some(ParsedClientMessage::Create { doc: Box::new(doc) })
        }
        "get" => Some(ParsedClientMessage::Get {
            code: parse_code(object.get("code"))?,
        }),
        "subscribe" => Some(ParsedClientMessage::Subscribe {
            code: parse_code(object.get("code"))?,
        }),
        "unsubscribe" => Some(ParsedClientMessage::Unsubscribe {
            code: parse_code(object.get("code"))?,
        }),
        "update" => {
            let code = parse_code(object.get("code"))?;
            let patch: GamePatch = serde_json::from_value(object.get("patch")?.clone()).ok()?;
            Some(ParsedClientMessage::Update {
                code,
                patch: Box::new(patch),
            })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_code(value: Option<&Value>) -> Option<String> {
    normalize_code(value?.as_str()?)
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot {
        code: String,
        doc: GameDoc,
    },
    Ack {
        code: String,
        op: &'static str,
    },
    Error {
        message: String,
    },
    Pong {
        t: f64,
        #[serde(rename = "serverTime")]
        server_time: u64,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::active_doc;
    use crate::types::LineId;

    #[test]
    fn parse_subscribe_normalizes_code() {
        let parsed = parse_client_message(r#"{"type":"subscribe","code":" testab "}"#)
            .expect("subscribe message should parse");
        match parsed {
            ParsedClientMessage::Subscribe { code } => assert_eq!(code, "TESTAB"),
            _ => panic!("expected subscribe message"),
        }
    }

    #[test]
    fn parse_update_reads_patch() {
        let parsed = parse_client_message(
            r#"{"type":"update","code":"TESTAB","patch":{"lines":{"1,2,v":0},"currentPlayerIndex":1}}"#,
        )
        .expect("update message should parse");
        match parsed {
            ParsedClientMessage::Update { code, patch } => {
                assert_eq!(code, "TESTAB");
                assert_eq!(patch.lines.get(&LineId::vertical(1, 2)), Some(&Some(0)));
                assert_eq!(patch.current_player_index, Some(1));
            }
            _ => panic!("expected update message"),
        }
    }

    #[test]
    fn parse_create_requires_valid_code() {
        let doc = active_doc(2);
        let raw = serde_json::json!({"type": "create", "doc": doc}).to_string();
        assert!(matches!(
            parse_client_message(&raw),
            Some(ParsedClientMessage::Create { .. })
        ));

        let mut bad = active_doc(2);
        bad.code = "x".to_string();
        let raw = serde_json::json!({"type": "create", "doc": bad}).to_string();
        assert!(parse_client_message(&raw).is_none());
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(parse_client_message("not json").is_none());
        assert!(parse_client_message(r#"{"type":"get"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"update","code":"TESTAB","patch":{"lines":{"bad":0}}}"#).is_none());
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        let parsed = parse_client_message(r#"{"type":"ping","t":12.5}"#);
        assert!(matches!(parsed, Some(ParsedClientMessage::Ping { .. })));
        assert!(parse_client_message(r#"{"type":"ping","t":"x"}"#).is_none());
    }

    #[test]
    fn server_messages_are_type_tagged() {
        let value = serde_json::to_value(ServerMessage::Pong {
            t: 1.0,
            server_time: 5,
        })
        .expect("serializes");
        assert_eq!(value["type"], "pong");
        assert_eq!(value["serverTime"], 5);
        let value = serde_json::to_value(ServerMessage::error("nope")).expect("serializes");
        assert_eq!(value, serde_json::json!({"type": "error", "message": "nope"}));
    }
}
