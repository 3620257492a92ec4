use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transcript::Speaker;

/// Durable transcript-append payload carried on the control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPayload {
    pub speaker: Speaker,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Transcript row as the session server echoes it back (it assigns the id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTranscript {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: u64,
}

/// Messages the client sends to the session server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Start { token: String, mode: String },
    End,
    Transcript { payload: TranscriptPayload },
    /// Live-typing update for a peer view; tagged distinctly so the server
    /// never mistakes it for a durable append.
    PartialTranscript { payload: TranscriptPayload },
    RequestAnalysis,
    Ping,
}

/// Messages the session server sends to the client, routed by the `type`
/// discriminator. Types we do not recognize never become errors; the
/// dispatcher logs and drops them.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SessionStarted,
    SessionEnded,
    NewTranscript(ServerTranscript),
    TranscriptUpdate(ServerTranscript),
    PartialTranscriptUpdate(ServerTranscript),
    WeakPointsUpdated(Vec<Value>),
    SuggestedQuestions(Vec<Value>),
    Pong,
    ServerError(String),
}

/// Parse one inbound control frame.
///
/// `Ok(None)` means a well-formed message of an unrecognized type; `Err`
/// means the frame was not valid JSON or a known type carried a malformed
/// payload. Both are protocol errors for the caller to log, never to
/// propagate.
pub fn parse_inbound(raw: &str) -> anyhow::Result<Option<InboundMessage>> {
    let value: Value = serde_json::from_str(raw)?;
    let msg_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

    let parsed = match msg_type {
        "session_started" => Some(InboundMessage::SessionStarted),
        "session_ended" => Some(InboundMessage::SessionEnded),
        "new_transcript" => Some(InboundMessage::NewTranscript(payload_of(&value)?)),
        "transcript_update" => Some(InboundMessage::TranscriptUpdate(payload_of(&value)?)),
        "partial_transcript_update" => {
            Some(InboundMessage::PartialTranscriptUpdate(payload_of(&value)?))
        }
        "weak_points_updated" => Some(InboundMessage::WeakPointsUpdated(list_payload(&value))),
        "suggested_questions" => Some(InboundMessage::SuggestedQuestions(list_payload(&value))),
        "pong" => Some(InboundMessage::Pong),
        "error" => {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unspecified server error")
                .to_string();
            Some(InboundMessage::ServerError(message))
        }
        _ => None,
    };

    Ok(parsed)
}

fn payload_of(value: &Value) -> anyhow::Result<ServerTranscript> {
    let payload = value
        .get("payload")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing payload field"))?;
    Ok(serde_json::from_value(payload)?)
}

fn list_payload(value: &Value) -> Vec<Value> {
    value
        .get("payload")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_start_shape() {
        let msg = OutboundMessage::Start {
            token: "jwt".to_string(),
            mode: "realtime".to_string(),
        };
        let json: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["token"], "jwt");
        assert_eq!(json["mode"], "realtime");
    }

    #[test]
    fn test_outbound_transcript_shape() {
        let msg = OutboundMessage::Transcript {
            payload: TranscriptPayload {
                speaker: Speaker::Hr,
                text: "Tell me about yourself".to_string(),
                timestamp: 1_700_000_000_000,
            },
        };
        let json: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "transcript");
        assert_eq!(json["payload"]["speaker"], "hr");
        assert_eq!(json["payload"]["text"], "Tell me about yourself");
        assert_eq!(json["payload"]["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_outbound_unit_variants() {
        assert_eq!(
            serde_json::to_value(&OutboundMessage::End).unwrap()["type"],
            "end"
        );
        assert_eq!(
            serde_json::to_value(&OutboundMessage::Ping).unwrap()["type"],
            "ping"
        );
        assert_eq!(
            serde_json::to_value(&OutboundMessage::RequestAnalysis).unwrap()["type"],
            "request_analysis"
        );
    }

    #[test]
    fn test_partial_transcript_is_tagged_distinctly() {
        let payload = TranscriptPayload {
            speaker: Speaker::Candidate,
            text: "I think the".to_string(),
            timestamp: 1000,
        };
        let partial = serde_json::to_value(&OutboundMessage::PartialTranscript {
            payload: payload.clone(),
        })
        .unwrap();
        let durable = serde_json::to_value(&OutboundMessage::Transcript { payload }).unwrap();
        assert_eq!(partial["type"], "partial_transcript");
        assert_eq!(durable["type"], "transcript");
        assert_ne!(partial["type"], durable["type"]);
    }

    #[test]
    fn test_parse_transcript_update() {
        let raw = r#"{
            "type": "transcript_update",
            "payload": {"id": "t-1", "speaker": "candidate", "text": "hello", "timestamp": 1000}
        }"#;
        let msg = parse_inbound(raw).unwrap().unwrap();
        match msg {
            InboundMessage::TranscriptUpdate(t) => {
                assert_eq!(t.id, "t-1");
                assert_eq!(t.speaker, Speaker::Candidate);
                assert_eq!(t.text, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pong() {
        let msg = parse_inbound(r#"{"type":"pong"}"#).unwrap().unwrap();
        assert_eq!(msg, InboundMessage::Pong);
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let parsed = parse_inbound(r#"{"type":"telemetry","payload":{}}"#).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse_inbound("{not json").is_err());
    }

    #[test]
    fn test_parse_error_message() {
        let msg = parse_inbound(r#"{"type":"error","message":"Invalid token"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            InboundMessage::ServerError("Invalid token".to_string())
        );
    }

    #[test]
    fn test_parse_suggested_questions_list() {
        let raw = r#"{"type":"suggested_questions","payload":[{"text":"Why Rust?"}]}"#;
        let msg = parse_inbound(raw).unwrap().unwrap();
        match msg {
            InboundMessage::SuggestedQuestions(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
