//! Interview session lifecycle
//!
//! This module provides the `SessionOrchestrator` abstraction that manages:
//! - Starting and stopping both capture/transcription legs
//! - The credential fetch before capture begins
//! - Control-plane lifecycle messages and inbound routing
//! - Session state (Idle/Running/Ended) and statistics

mod config;
mod orchestrator;

pub use config::SessionConfig;
pub use orchestrator::{SessionOrchestrator, SessionState, SessionStats};
