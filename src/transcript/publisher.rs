use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::block::{TranscriptEntry, UtteranceBlock};
use super::store::TranscriptStore;
use crate::control::messages::TranscriptPayload;

/// Where finalized utterances are forwarded. The control channel implements
/// this; tests substitute a recording stub.
pub trait ControlSink: Send + Sync {
    /// Dispatch a durable transcript-append action. Returns false if the
    /// message was dropped (connection not open); the publisher does not
    /// retry either way.
    fn forward_final(&self, payload: TranscriptPayload) -> bool;

    /// Dispatch an ephemeral live-typing update, tagged distinctly from
    /// durable appends. Only used when partial forwarding is enabled.
    fn forward_partial(&self, payload: TranscriptPayload) -> bool;
}

/// Fan-out sink for assembled utterance blocks.
///
/// Partials update only the render map. Finals append to the durable
/// transcript and go out over the control sink at most once per block id,
/// guarded here independently of the assembler's own finalize-once check:
/// different failure domains may hand us the same final twice.
pub struct TranscriptPublisher {
    store: Arc<TranscriptStore>,
    sink: Arc<dyn ControlSink>,
    forwarded: HashSet<Uuid>,
    forward_partials: bool,
}

impl TranscriptPublisher {
    pub fn new(store: Arc<TranscriptStore>, sink: Arc<dyn ControlSink>) -> Self {
        Self {
            store,
            sink,
            forwarded: HashSet::new(),
            forward_partials: false,
        }
    }

    /// Enable forwarding of partial blocks to a live-typing peer view.
    pub fn with_partial_forwarding(mut self, enabled: bool) -> Self {
        self.forward_partials = enabled;
        self
    }

    pub fn on_block(&mut self, block: &UtteranceBlock) {
        if !block.is_final {
            self.store
                .upsert(block.id, block.channel, &block.text, false);
            if self.forward_partials {
                let sent = self.sink.forward_partial(TranscriptPayload {
                    speaker: block.channel,
                    text: block.text.clone(),
                    timestamp: block.created_at_ms,
                });
                if !sent {
                    debug!(speaker = %block.channel, "partial update dropped, control channel not open");
                }
            }
            return;
        }

        // At-most-once per block id, for the durable append and the control
        // forward alike; a duplicate must not touch the store again.
        if !self.forwarded.insert(block.id) {
            debug!(id = %block.id, "final block already published, skipping");
            return;
        }

        self.store
            .upsert(block.id, block.channel, &block.text, true);
        self.store.append_final(TranscriptEntry {
            id: block.id,
            speaker: block.channel,
            text: block.text.clone(),
            timestamp_ms: block.created_at_ms,
            is_final: true,
        });

        let sent = self.sink.forward_final(TranscriptPayload {
            speaker: block.channel,
            text: block.text.clone(),
            timestamp: block.created_at_ms,
        });
        if sent {
            info!(speaker = %block.channel, chars = block.text.len(), "final utterance forwarded");
        } else {
            warn!(speaker = %block.channel, "final utterance dropped, control channel not open");
        }
    }

    /// Consume blocks from both channel pipelines until every sender is gone.
    pub async fn run(mut self, mut blocks_rx: mpsc::Receiver<UtteranceBlock>) {
        info!("transcript publisher started");
        while let Some(block) = blocks_rx.recv().await {
            self.on_block(&block);
        }
        info!("transcript publisher stopped");
    }
}
