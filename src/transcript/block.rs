use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the interview a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The interviewer channel (microphone).
    Hr,
    /// The candidate channel (shared-screen audio track).
    Candidate,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::Hr => "hr",
            Speaker::Candidate => "candidate",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One utterance as assembled from the engine's turn events.
///
/// The id is stable across partial revisions of the same utterance; the
/// assembler mints a fresh id once a block finalizes.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceBlock {
    pub id: Uuid,
    pub channel: Speaker,
    pub text: String,
    pub created_at_ms: u64,
    pub is_final: bool,
}

/// A finalized line of the durable transcript. Only Final blocks become
/// entries; partials exist only in the ephemeral render map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp_ms: u64,
    pub is_final: bool,
}
