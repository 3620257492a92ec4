use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::BackoffConfig;

/// Configuration for one interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "interview-2026-08-30-backend-role")
    pub session_id: String,

    /// Session-server auth token carried on the `start` message. Issued by
    /// whatever login flow runs before this pipeline; opaque here.
    pub auth_token: String,

    /// Interview mode forwarded to the session server.
    pub mode: String,

    /// Transcription engine WebSocket endpoint.
    pub engine_url: String,

    /// Session-server WebSocket endpoint (the control plane).
    pub control_url: String,

    /// Session-server HTTP base, used once for the credential fetch.
    pub server_base_url: String,

    /// Forward partial blocks to a live-typing peer view.
    pub forward_partials: bool,

    /// Control-channel liveness ping cadence.
    pub ping_interval: Duration,

    /// Control-channel reconnect policy.
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("interview-{}", uuid::Uuid::new_v4()),
            auth_token: String::new(),
            mode: "realtime".to_string(),
            engine_url: "wss://streaming.assemblyai.com/v3/ws".to_string(),
            control_url: "ws://localhost:8000/ws".to_string(),
            server_base_url: "http://localhost:8000".to_string(),
            forward_partials: false,
            ping_interval: Duration::from_secs(15),
            backoff: BackoffConfig::default(),
        }
    }
}
