//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Status snapshots and the read/trigger view shared with the HTTP surface."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crm_ingest_producer::OutcomeKind;
use crm_ingest_publisher::{DeadLetter, DeadLetterQueue};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::scheduler::SchedulerError;

/// Point-in-time view of one producer's schedule and health.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerStatus {
    pub source: String,
    pub healthy: bool,
    /// A run is queued on the worker pool or executing.
    pub in_flight: bool,
    pub consecutive_failures: u32,
    #[serde(rename = "cadence_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cadence: Duration,
    /// Interval until the next trigger, including failure backoff.
    #[serde(rename = "current_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub current_interval: Duration,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<OutcomeKind>,
    pub last_summary: Option<String>,
    pub runs_total: u64,
    pub skipped_triggers: u64,
}

pub(crate) type SharedStatuses = Arc<RwLock<IndexMap<String, ProducerStatus>>>;

/// Cloneable read and trigger access to a running scheduler.
#[derive(Clone)]
pub struct SchedulerView {
    pub(crate) statuses: SharedStatuses,
    pub(crate) triggers: Arc<IndexMap<String, mpsc::Sender<()>>>,
    pub(crate) dead_letters: Arc<DeadLetterQueue>,
}

impl SchedulerView {
    /// Status of one producer.
    pub fn status(&self, source: &str) -> Option<ProducerStatus> {
        self.statuses.read().get(source).cloned()
    }

    /// Status of every producer in registration order.
    pub fn statuses(&self) -> Vec<ProducerStatus> {
        self.statuses.read().values().cloned().collect()
    }

    /// Request an immediate run of `source`.
    ///
    /// Requests made while a run is in flight are skipped like any other trigger. Several
    /// requests made before the trigger task wakes up collapse into one.
    pub fn trigger(&self, source: &str) -> Result<(), SchedulerError> {
        let sender = self
            .triggers
            .get(source)
            .ok_or_else(|| SchedulerError::UnknownProducer(source.to_owned()))?;
        match sender.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => {
                debug!(source, "manual trigger already pending");
                Ok(())
            }
            Err(TrySendError::Closed(())) => Err(SchedulerError::ShuttingDown),
        }
    }

    /// Snapshot of the dead-letter backlog.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.entries()
    }

    /// Whether `source` is a registered producer.
    pub fn contains(&self, source: &str) -> bool {
        self.triggers.contains_key(source)
    }
}

impl std::fmt::Debug for SchedulerView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerView")
            .field("producers", &self.triggers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
