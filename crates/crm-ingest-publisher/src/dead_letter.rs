//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use crm_ingest_envelope::Envelope;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Envelope that exhausted its delivery attempts, kept for inspection or replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Producer that emitted the envelope.
    pub source: String,
    /// The undelivered envelope.
    pub envelope: Envelope,
    /// Last transport error observed.
    pub reason: String,
    /// Number of delivery attempts made.
    pub attempts: u32,
    /// When the envelope was routed here.
    pub failed_at: DateTime<Utc>,
}

/// In-memory dead-letter backlog shared by the publisher and the status surface.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    /// Create an empty backlog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a dead letter.
    pub fn push(&self, letter: DeadLetter) {
        self.entries.lock().push(letter);
    }

    /// Snapshot of every dead letter, oldest first.
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().clone()
    }

    /// Dead letters emitted by one producer.
    pub fn entries_for(&self, source: &str) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .iter()
            .filter(|letter| letter.source == source)
            .cloned()
            .collect()
    }

    /// Current backlog size.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the backlog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every dead letter, e.g. before a replay.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries.lock())
    }
}
