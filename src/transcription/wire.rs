use serde_json::Value;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};

/// One `Turn` event from the engine. A given `turn_order` may arrive many
/// times with refined text before (and after) finalizing.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnEvent {
    pub turn_order: u32,
    pub text: String,
    pub end_of_turn: bool,
    pub formatted: bool,
}

/// Everything the engine socket can hand us.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Turn(TurnEvent),
    /// Engine-side session bookkeeping; logged, nothing more.
    SessionBegin(String),
    SessionTerminated,
    /// Well-formed JSON of a type we do not care about.
    Ignored(String),
}

/// Parse one text frame from the engine socket. Only `type == "Turn"`
/// carries transcript data; everything else is informational.
pub fn parse_engine_event(raw: &str) -> anyhow::Result<EngineEvent> {
    let event: Value = serde_json::from_str(raw)?;
    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "Turn" => {
            let text = event
                .get("transcript")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            let turn_order = event
                .get("turn_order")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            let end_of_turn = event
                .get("end_of_turn")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let formatted = event
                .get("turn_is_formatted")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            Ok(EngineEvent::Turn(TurnEvent {
                turn_order,
                text,
                end_of_turn,
                formatted,
            }))
        }
        "Begin" => {
            let id = event
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            Ok(EngineEvent::SessionBegin(id))
        }
        "Termination" => Ok(EngineEvent::SessionTerminated),
        other => Ok(EngineEvent::Ignored(other.to_string())),
    }
}

/// The JSON message that asks the engine to finish and close the stream.
pub fn terminate_message() -> String {
    serde_json::json!({"type": "Terminate"}).to_string()
}

/// Build the engine WebSocket request: streaming parameters on the query
/// string, credential in the Authorization header.
pub fn engine_request(
    base_url: &str,
    token: &str,
    sample_rate: u32,
) -> anyhow::Result<tungstenite::http::Request<()>> {
    let url = format!(
        "{}?sample_rate={}&encoding=pcm_s16le&format_turns=true",
        base_url, sample_rate
    );
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", token.parse()?);
    Ok(request)
}
