//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Run outcomes reported by producers to the scheduler."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use crm_ingest_envelope::{EnvelopeError, NormalizeError};
use serde::Serialize;
use thiserror::Error;

/// Failure that aborted a whole run before or while fetching.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    /// The external system could not be reached or returned garbage.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The run exceeded its timeout and was cancelled.
    #[error("run exceeded timeout of {0:?}")]
    Timeout(Duration),
    /// The run panicked; the panic was contained to this run.
    #[error("run panicked: {0}")]
    Panicked(String),
    /// The run was cancelled during shutdown.
    #[error("run cancelled by shutdown")]
    Cancelled,
}

/// Why an individual record did not make it to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFailureReason {
    /// The raw record could not be normalized.
    Normalize(NormalizeError),
    /// The envelope was rejected before sending.
    Rejected(EnvelopeError),
    /// The publisher gave up and dead-lettered the envelope.
    Undelivered {
        /// Delivery attempts made.
        attempts: u32,
        /// Last transport error.
        reason: String,
    },
}

impl fmt::Display for RecordFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFailureReason::Normalize(err) => write!(f, "{}", err),
            RecordFailureReason::Rejected(err) => write!(f, "rejected: {}", err),
            RecordFailureReason::Undelivered { attempts, reason } => {
                write!(f, "undelivered after {} attempts: {}", attempts, reason)
            }
        }
    }
}

/// One record that failed inside an otherwise successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Position of the record in the fetched batch.
    pub index: usize,
    /// Envelope id, when normalization got far enough to produce one.
    pub id: Option<String>,
    /// What went wrong.
    pub reason: RecordFailureReason,
}

/// Coarse classification of a run, used for health tracking, labels, and the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Every record was delivered.
    Success,
    /// Some records failed; the run itself completed.
    PartialFailure,
    /// The run as a whole failed.
    Fatal,
}

impl OutcomeKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::PartialFailure => "partial_failure",
            OutcomeKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one producer run, returned to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every fetched record was delivered.
    Success {
        /// Envelopes delivered.
        published: usize,
    },
    /// The run finished but some records were skipped or dead-lettered.
    PartialFailure {
        /// Envelopes delivered.
        published: usize,
        /// Records that failed, in batch order.
        failures: Vec<RecordFailure>,
    },
    /// The run failed as a whole.
    Fatal(ProducerError),
}

impl RunOutcome {
    /// Build `Success` or `PartialFailure` from per-record results.
    pub fn from_records(published: usize, failures: Vec<RecordFailure>) -> Self {
        if failures.is_empty() {
            RunOutcome::Success { published }
        } else {
            RunOutcome::PartialFailure {
                published,
                failures,
            }
        }
    }

    /// Coarse classification.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            RunOutcome::Success { .. } => OutcomeKind::Success,
            RunOutcome::PartialFailure { .. } => OutcomeKind::PartialFailure,
            RunOutcome::Fatal(_) => OutcomeKind::Fatal,
        }
    }

    /// Whether the run failed as a whole.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunOutcome::Fatal(_))
    }

    /// Envelopes delivered during the run.
    pub fn published(&self) -> usize {
        match self {
            RunOutcome::Success { published } | RunOutcome::PartialFailure { published, .. } => {
                *published
            }
            RunOutcome::Fatal(_) => 0,
        }
    }

    /// Number of records that failed individually.
    pub fn failed_records(&self) -> usize {
        match self {
            RunOutcome::PartialFailure { failures, .. } => failures.len(),
            _ => 0,
        }
    }

    /// Human-readable summary suitable for status output.
    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Success { published } => format!("published {}", published),
            RunOutcome::PartialFailure {
                published,
                failures,
            } => format!("published {}, failed {}", published, failures.len()),
            RunOutcome::Fatal(err) => err.to_string(),
        }
    }
}
