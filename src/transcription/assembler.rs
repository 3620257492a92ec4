use std::collections::{BTreeMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use super::wire::TurnEvent;
use crate::transcript::{Speaker, UtteranceBlock};

/// Per-channel state machine folding the engine's turn-event stream into
/// deduplicated Partial/Final utterance blocks.
///
/// Text accumulates in per-`turn_order` slots (last write wins per slot,
/// ordered map so the reconstructed text is stable); the display text is
/// all slots joined in ascending turn order. Exactly one Final is emitted
/// per block id: the finalized marker is set before the block is handed
/// out, so a redelivered finalizing event is a no-op.
pub struct UtteranceAssembler {
    channel: Speaker,
    block_id: Uuid,
    slots: BTreeMap<u32, String>,
    finalized: HashSet<Uuid>,
    /// Highest turn order consumed by a finalized block. Engine turn orders
    /// are monotonic, so anything at or below this is a redelivery.
    last_finalized_turn: Option<u32>,
}

impl UtteranceAssembler {
    pub fn new(channel: Speaker) -> Self {
        Self {
            channel,
            block_id: Uuid::new_v4(),
            slots: BTreeMap::new(),
            finalized: HashSet::new(),
            last_finalized_turn: None,
        }
    }

    pub fn channel(&self) -> Speaker {
        self.channel
    }

    /// True while an utterance is in flight (some slot text accumulated).
    pub fn is_accumulating(&self) -> bool {
        !self.display_text().is_empty()
    }

    /// Apply one turn event, returning the blocks to publish in order.
    pub fn apply(&mut self, event: &TurnEvent, now_ms: u64) -> Vec<UtteranceBlock> {
        if let Some(last) = self.last_finalized_turn {
            if event.turn_order <= last {
                debug!(
                    channel = %self.channel,
                    turn_order = event.turn_order,
                    "dropping redelivered event for finalized turn"
                );
                return Vec::new();
            }
        }

        self.slots.insert(event.turn_order, event.text.clone());
        let display = self.display_text();

        if event.end_of_turn && event.formatted {
            return match self.finalize(display, now_ms) {
                Some(block) => vec![block],
                None => Vec::new(),
            };
        }

        if display.is_empty() {
            return Vec::new();
        }

        vec![UtteranceBlock {
            id: self.block_id,
            channel: self.channel,
            text: display,
            created_at_ms: now_ms,
            is_final: false,
        }]
    }

    /// Producer-stop edge case: an in-flight utterance with non-empty text
    /// is finalized even though no end-of-turn ever arrived, so the last
    /// sentence survives a manual stop.
    pub fn flush(&mut self, now_ms: u64) -> Option<UtteranceBlock> {
        let display = self.display_text();
        if display.is_empty() {
            return None;
        }
        debug!(channel = %self.channel, "flushing in-flight utterance on stop");
        self.finalize(display, now_ms)
    }

    fn finalize(&mut self, text: String, now_ms: u64) -> Option<UtteranceBlock> {
        if self.finalized.contains(&self.block_id) {
            debug!(channel = %self.channel, id = %self.block_id, "duplicate finalize ignored");
            return None;
        }
        if text.is_empty() {
            return None;
        }

        // Mark finalized before the block leaves this function; any async
        // redelivery of the finalizing signal sees the guard already set.
        self.finalized.insert(self.block_id);
        if let Some(&max_turn) = self.slots.keys().next_back() {
            self.last_finalized_turn = Some(
                self.last_finalized_turn
                    .map_or(max_turn, |last| last.max(max_turn)),
            );
        }

        let block = UtteranceBlock {
            id: self.block_id,
            channel: self.channel,
            text,
            created_at_ms: now_ms,
            is_final: true,
        };

        self.slots.clear();
        self.block_id = Uuid::new_v4();

        Some(block)
    }

    fn display_text(&self) -> String {
        self.slots
            .values()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
