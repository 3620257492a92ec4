use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use crate::audio::{AudioFrameProducer, CaptureSource};
use crate::control::{
    ControlChannel, ControlState, InboundMessage, OutboundMessage, ServerTranscript,
};
use crate::credentials::fetch_transcription_credential;
use crate::transcript::{Speaker, TranscriptEntry, TranscriptPublisher, TranscriptStore};
use crate::transcription::{ChannelHandle, TranscriptionChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Terminal until external re-initialization.
    Ended,
}

/// Point-in-time view of a session for logging and status endpoints.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub final_entries: usize,
}

struct ChannelLeg {
    producer: AudioFrameProducer,
    handle: ChannelHandle,
}

/// Wires UI intent to the producers and the control channel, and owns the
/// session lifecycle. Everything it needs is passed at construction; there
/// is no ambient session state, so several sessions can coexist in tests.
pub struct SessionOrchestrator {
    config: SessionConfig,
    control: Arc<ControlChannel>,
    store: Arc<TranscriptStore>,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    legs: Vec<ChannelLeg>,
    publisher_task: Option<JoinHandle<()>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        control: Arc<ControlChannel>,
        store: Arc<TranscriptStore>,
    ) -> Self {
        Self {
            config,
            control,
            store,
            state: SessionState::Idle,
            started_at: None,
            legs: Vec::new(),
            publisher_task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            started_at: self.started_at,
            final_entries: self.store.entry_count(),
        }
    }

    /// Start recording both channels. Preconditions are explicit: the
    /// session must be Idle and the control channel Open; either capture
    /// source failing to acquire rejects the start with the classified
    /// device error rather than half-starting.
    pub async fn start(
        &mut self,
        hr_source: Box<dyn CaptureSource>,
        candidate_source: Box<dyn CaptureSource>,
    ) -> Result<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Running => bail!("session is already running"),
            SessionState::Ended => bail!("session has ended; re-initialize to start again"),
        }
        if self.control.state() != ControlState::Open {
            bail!(
                "control channel is not open (state: {:?})",
                self.control.state()
            );
        }

        info!(session = %self.config.session_id, "starting interview session");

        // One credential for both engine sockets, fetched before any
        // capture starts.
        let token = fetch_transcription_credential(&self.config.server_base_url)
            .await
            .context("transcription credential unavailable")?;

        let (blocks_tx, blocks_rx) = mpsc::channel(64);
        let publisher = TranscriptPublisher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.control) as Arc<dyn crate::transcript::ControlSink>,
        )
        .with_partial_forwarding(self.config.forward_partials);
        self.publisher_task = Some(tokio::spawn(publisher.run(blocks_rx)));

        let sources = [
            (Speaker::Hr, hr_source),
            (Speaker::Candidate, candidate_source),
        ];
        for (speaker, source) in sources {
            match self.start_leg(speaker, source, &token, blocks_tx.clone()).await {
                Ok(leg) => self.legs.push(leg),
                Err(e) => {
                    warn!(channel = %speaker, "start rejected: {}", e);
                    self.abort_start().await;
                    return Err(e.context(format!("failed to start {} channel", speaker)));
                }
            }
        }
        drop(blocks_tx);

        if !self.control.send(OutboundMessage::Start {
            token: self.config.auth_token.clone(),
            mode: self.config.mode.clone(),
        }) {
            self.abort_start().await;
            bail!("control channel dropped while starting the session");
        }

        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        info!(session = %self.config.session_id, "interview session running");
        Ok(())
    }

    /// The socket must be open before the producer emits its first frame,
    /// or the opening of the first utterance is lost.
    async fn start_leg(
        &self,
        speaker: Speaker,
        source: Box<dyn CaptureSource>,
        token: &str,
        blocks_tx: mpsc::Sender<crate::transcript::UtteranceBlock>,
    ) -> Result<ChannelLeg> {
        let channel =
            TranscriptionChannel::connect(&self.config.engine_url, token, speaker).await?;

        let mut producer = AudioFrameProducer::new(speaker, source);
        let frames_rx = producer.start().await?;

        let handle = channel.run(frames_rx, blocks_tx);
        Ok(ChannelLeg { producer, handle })
    }

    async fn abort_start(&mut self) {
        for mut leg in self.legs.drain(..) {
            leg.producer.stop().await;
            leg.handle.shutdown().await;
        }
        if let Some(task) = self.publisher_task.take() {
            // Publisher exits once every block sender is gone.
            let _ = task.await;
        }
    }

    /// End the session: stop both producers (flushing in-flight
    /// utterances), tell the server, close the control channel with the
    /// clean code. Terminal.
    pub async fn end(&mut self) -> Result<()> {
        if self.state == SessionState::Ended {
            return Ok(());
        }

        info!(session = %self.config.session_id, "ending interview session");

        for mut leg in self.legs.drain(..) {
            leg.producer.stop().await;
            leg.handle.shutdown().await;
        }
        if let Some(task) = self.publisher_task.take() {
            let _ = task.await;
        }

        if self.state == SessionState::Running && !self.control.send(OutboundMessage::End) {
            warn!("end notification dropped, control channel not open");
        }
        self.control.close().await;

        self.state = SessionState::Ended;
        info!(
            session = %self.config.session_id,
            entries = self.store.entry_count(),
            "interview session ended"
        );
        Ok(())
    }

    /// Ask the server-side analyzer for fresh follow-up questions. Returns
    /// false if the request was dropped.
    pub fn request_analysis(&self) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.control.send(OutboundMessage::RequestAnalysis)
    }

    /// Route one inbound control message. Returns true when the server has
    /// ended the session and the caller should drive `end()`.
    pub fn handle_control_message(&mut self, message: InboundMessage) -> bool {
        match message {
            InboundMessage::SessionStarted => {
                info!(session = %self.config.session_id, "session acknowledged by server");
            }
            InboundMessage::SessionEnded => {
                info!(session = %self.config.session_id, "server ended the session");
                return true;
            }
            InboundMessage::NewTranscript(t) | InboundMessage::TranscriptUpdate(t) => {
                self.apply_server_transcript(t, true);
            }
            InboundMessage::PartialTranscriptUpdate(t) => {
                self.apply_server_transcript(t, false);
            }
            InboundMessage::WeakPointsUpdated(items) => {
                info!(count = items.len(), "weak points updated");
            }
            InboundMessage::SuggestedQuestions(items) => {
                info!(count = items.len(), "suggested questions received");
            }
            InboundMessage::Pong => {
                debug!("pong");
            }
            InboundMessage::ServerError(message) => {
                warn!("session server error: {}", message);
            }
        }
        false
    }

    /// Server-echoed transcript rows (our own finals, or a peer's) keyed by
    /// the server-assigned string id, mapped stably into the store.
    fn apply_server_transcript(&self, transcript: ServerTranscript, is_final: bool) {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, transcript.id.as_bytes());
        if is_final {
            self.store.append_final(TranscriptEntry {
                id,
                speaker: transcript.speaker,
                text: transcript.text,
                timestamp_ms: transcript.timestamp,
                is_final: true,
            });
        } else {
            self.store
                .upsert(id, transcript.speaker, &transcript.text, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::BackoffConfig;
    use std::time::Duration;

    fn test_setup() -> SessionOrchestrator {
        let (control, _events) = ControlChannel::new(
            "ws://localhost:1/ws".to_string(),
            Duration::from_secs(15),
            BackoffConfig::default(),
        );
        let store = Arc::new(TranscriptStore::new());
        SessionOrchestrator::new(SessionConfig::default(), control, store)
    }

    #[tokio::test]
    async fn test_start_rejected_while_control_disconnected() {
        use crate::audio::ScriptedSource;

        let mut orchestrator = test_setup();
        let result = orchestrator
            .start(
                Box::new(ScriptedSource::new("hr", vec![])),
                Box::new(ScriptedSource::new("candidate", vec![])),
            )
            .await;

        let err = result.expect_err("start must be rejected");
        assert!(err.to_string().contains("control channel is not open"));
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_end_is_terminal_and_idempotent() {
        let mut orchestrator = test_setup();
        orchestrator.end().await.unwrap();
        assert_eq!(orchestrator.state(), SessionState::Ended);

        orchestrator.end().await.unwrap();
        assert_eq!(orchestrator.state(), SessionState::Ended);

        // A start after end is rejected with a reason.
        use crate::audio::ScriptedSource;
        let err = orchestrator
            .start(
                Box::new(ScriptedSource::new("hr", vec![])),
                Box::new(ScriptedSource::new("candidate", vec![])),
            )
            .await
            .expect_err("start after end must fail");
        assert!(err.to_string().contains("ended"));
    }

    #[tokio::test]
    async fn test_request_analysis_requires_running_session() {
        let orchestrator = test_setup();
        assert!(!orchestrator.request_analysis());
    }

    #[tokio::test]
    async fn test_pong_changes_nothing() {
        let mut orchestrator = test_setup();
        let before = orchestrator.stats();

        let should_end = orchestrator.handle_control_message(InboundMessage::Pong);

        assert!(!should_end);
        assert_eq!(orchestrator.state(), before.state);
        assert_eq!(orchestrator.stats().final_entries, before.final_entries);
    }

    #[tokio::test]
    async fn test_server_session_ended_requests_teardown() {
        let mut orchestrator = test_setup();
        assert!(orchestrator.handle_control_message(InboundMessage::SessionEnded));
    }

    #[tokio::test]
    async fn test_server_transcript_updates_reach_the_store() {
        let mut orchestrator = test_setup();

        let partial = ServerTranscript {
            id: "t-9".to_string(),
            speaker: Speaker::Candidate,
            text: "I think".to_string(),
            timestamp: 100,
        };
        orchestrator.handle_control_message(InboundMessage::PartialTranscriptUpdate(partial));
        assert_eq!(orchestrator.store.live_snapshot().len(), 1);

        let final_row = ServerTranscript {
            id: "t-9".to_string(),
            speaker: Speaker::Candidate,
            text: "I think the approach works".to_string(),
            timestamp: 200,
        };
        orchestrator.handle_control_message(InboundMessage::NewTranscript(final_row));

        // Same server id maps to the same store id, so the live row is
        // replaced by the final entry instead of leaking.
        assert!(orchestrator.store.live_snapshot().is_empty());
        assert_eq!(orchestrator.store.entry_count(), 1);
    }
}
