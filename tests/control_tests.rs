use std::sync::Arc;
use std::time::Duration;

use interview_relay::control::{
    parse_inbound, BackoffConfig, ControlChannel, ControlEvent, ControlState, InboundMessage,
    OutboundMessage, TranscriptPayload,
};
use interview_relay::Speaker;
use serde_json::{json, Value};

fn payload() -> TranscriptPayload {
    TranscriptPayload {
        speaker: Speaker::Candidate,
        text: "I enjoy pairing.".to_string(),
        timestamp: 1_700_000_000_000,
    }
}

#[test]
fn test_transcript_message_wire_shape() {
    let msg = OutboundMessage::Transcript { payload: payload() };
    let value: Value = serde_json::to_value(&msg).unwrap();

    assert_eq!(
        value,
        json!({
            "type": "transcript",
            "payload": {
                "speaker": "candidate",
                "text": "I enjoy pairing.",
                "timestamp": 1_700_000_000_000u64,
            }
        })
    );
}

#[test]
fn test_partial_and_durable_transcripts_are_tagged_apart() {
    let durable = serde_json::to_value(OutboundMessage::Transcript { payload: payload() }).unwrap();
    let live =
        serde_json::to_value(OutboundMessage::PartialTranscript { payload: payload() }).unwrap();

    assert_eq!(durable["type"], "transcript");
    assert_eq!(live["type"], "partial_transcript");
}

#[test]
fn test_ping_pong_round_trip() {
    let ping = serde_json::to_value(OutboundMessage::Ping).unwrap();
    assert_eq!(ping, json!({"type": "ping"}));

    let pong = parse_inbound(r#"{"type": "pong"}"#).unwrap();
    assert!(matches!(pong, Some(InboundMessage::Pong)));
}

#[test]
fn test_unrecognized_type_is_skipped_not_fatal() {
    let parsed = parse_inbound(r#"{"type": "speaker_diarization_hint", "payload": {}}"#).unwrap();
    assert!(parsed.is_none());

    assert!(parse_inbound("{not json").is_err());
}

#[tokio::test]
async fn test_send_drops_while_not_open() {
    let (channel, _events) = ControlChannel::new(
        "ws://127.0.0.1:1/ws".to_string(),
        Duration::from_secs(15),
        BackoffConfig::default(),
    );

    assert_eq!(channel.state(), ControlState::Disconnected);
    assert!(!channel.send(OutboundMessage::Transcript { payload: payload() }));
}

#[tokio::test]
async fn test_reconnect_exhaustion_reports_failed() {
    let backoff = BackoffConfig {
        initial: Duration::from_millis(5),
        cap: Duration::from_millis(10),
        max_attempts: 2,
    };
    // Port 1 refuses connections; every attempt fails fast.
    let (channel, mut events) = ControlChannel::new(
        "ws://127.0.0.1:1/ws".to_string(),
        Duration::from_secs(15),
        backoff,
    );
    channel.connect().await;

    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let ControlEvent::StateChanged(ControlState::Failed) = event {
                return true;
            }
        }
        false
    })
    .await
    .expect("channel never gave up");
    assert!(failed);
    assert_eq!(channel.state(), ControlState::Failed);
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let backoff = BackoffConfig {
        initial: Duration::from_secs(30),
        cap: Duration::from_secs(30),
        max_attempts: 8,
    };
    let (channel, _events) = ControlChannel::new(
        "ws://127.0.0.1:1/ws".to_string(),
        Duration::from_secs(15),
        backoff,
    );
    channel.connect().await;

    // The first attempt fails immediately and the dispatcher parks on a 30s
    // backoff timer; close() must not wait it out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_secs(2), channel.close())
        .await
        .expect("close blocked on the backoff timer");
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let backoff = BackoffConfig {
        initial: Duration::from_secs(30),
        cap: Duration::from_secs(30),
        max_attempts: 8,
    };
    let (channel, _events) = ControlChannel::new(
        "ws://127.0.0.1:1/ws".to_string(),
        Duration::from_secs(15),
        backoff,
    );
    channel.connect().await;
    channel.connect().await;
    channel.close().await;
}

#[test]
fn test_backoff_schedule_matches_config() {
    let config = BackoffConfig {
        initial: Duration::from_secs(1),
        cap: Duration::from_secs(30),
        max_attempts: 8,
    };
    let mut backoff = interview_relay::control::Backoff::new(config);

    let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
        .map(|d| d.as_secs())
        .collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    assert!(backoff.next_delay().is_none());
}
