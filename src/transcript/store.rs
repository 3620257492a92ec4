use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use uuid::Uuid;

use super::block::{Speaker, TranscriptEntry};

/// One row of the ephemeral render target.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveUtterance {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// In-memory transcript state shared between the publisher and the UI layer.
///
/// The live map is insert-or-replace by block id and holds in-progress
/// utterances; the entry list is append-only and holds finalized lines.
/// Only the publisher mutates either; readers take snapshots.
///
/// Change notification is a single revision counter on a watch channel, so a
/// subscriber that polls at its own pace sees one wakeup with the latest
/// revision instead of one notification per inbound partial.
pub struct TranscriptStore {
    inner: Mutex<StoreInner>,
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct StoreInner {
    live: HashMap<Uuid, LiveUtterance>,
    entries: Vec<TranscriptEntry>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(StoreInner::default()),
            revision,
        }
    }

    /// Subscribe to change notifications. The value is a monotonically
    /// increasing revision; consumers re-read snapshots when it moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Insert-or-replace a live utterance by id.
    pub fn upsert(&self, id: Uuid, speaker: Speaker, text: &str, is_final: bool) {
        {
            let mut inner = self.inner.lock().expect("transcript store poisoned");
            inner.live.insert(
                id,
                LiveUtterance {
                    id,
                    speaker,
                    text: text.to_string(),
                    is_final,
                },
            );
        }
        self.bump();
    }

    /// Append a finalized entry to the durable transcript and drop the
    /// matching live row (it is no longer in progress).
    pub fn append_final(&self, entry: TranscriptEntry) {
        {
            let mut inner = self.inner.lock().expect("transcript store poisoned");
            inner.live.remove(&entry.id);
            inner.entries.push(entry);
        }
        self.bump();
    }

    pub fn live_snapshot(&self) -> Vec<LiveUtterance> {
        let inner = self.inner.lock().expect("transcript store poisoned");
        inner.live.values().cloned().collect()
    }

    /// Durable entries in arrival order.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        let inner = self.inner.lock().expect("transcript store poisoned");
        inner.entries.clone()
    }

    pub fn entry_count(&self) -> usize {
        let inner = self.inner.lock().expect("transcript store poisoned");
        inner.entries.len()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_by_id() {
        let store = TranscriptStore::new();
        let id = Uuid::new_v4();

        store.upsert(id, Speaker::Hr, "Tell me", false);
        store.upsert(id, Speaker::Hr, "Tell me about yourself", false);

        let live = store.live_snapshot();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].text, "Tell me about yourself");
        assert!(!live[0].is_final);
    }

    #[test]
    fn test_append_final_clears_live_row() {
        let store = TranscriptStore::new();
        let id = Uuid::new_v4();

        store.upsert(id, Speaker::Candidate, "I think", false);
        store.append_final(TranscriptEntry {
            id,
            speaker: Speaker::Candidate,
            text: "I think the".to_string(),
            timestamp_ms: 42,
            is_final: true,
        });

        assert!(store.live_snapshot().is_empty());
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "I think the");
    }

    #[test]
    fn test_entries_are_append_only_in_arrival_order() {
        let store = TranscriptStore::new();
        for text in ["one", "two", "three"] {
            store.append_final(TranscriptEntry {
                id: Uuid::new_v4(),
                speaker: Speaker::Hr,
                text: text.to_string(),
                timestamp_ms: 0,
                is_final: true,
            });
        }

        let texts: Vec<_> = store.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_revision_moves_on_every_mutation() {
        let store = TranscriptStore::new();
        let rx = store.subscribe();
        assert_eq!(*rx.borrow(), 0);

        store.upsert(Uuid::new_v4(), Speaker::Hr, "hello", false);
        assert_eq!(*rx.borrow(), 1);

        store.append_final(TranscriptEntry {
            id: Uuid::new_v4(),
            speaker: Speaker::Hr,
            text: "hello".to_string(),
            timestamp_ms: 0,
            is_final: true,
        });
        assert_eq!(*rx.borrow(), 2);
    }
}
