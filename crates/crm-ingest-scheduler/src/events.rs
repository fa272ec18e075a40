//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Lifecycle events broadcast by the scheduler."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::time::Duration;

use crm_ingest_producer::RunOutcome;

/// Lifecycle notifications for observers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A run acquired a worker and started producing.
    RunStarted { source: String },
    /// A run finished, failed, timed out, panicked, or was cancelled.
    RunCompleted {
        source: String,
        outcome: RunOutcome,
        duration: Duration,
    },
    /// A trigger fired while the previous run was still in flight.
    TriggerSkipped { source: String },
    /// The producer's health flag flipped.
    HealthChanged {
        source: String,
        healthy: bool,
        consecutive_failures: u32,
    },
}

impl SchedulerEvent {
    /// Producer the event refers to.
    pub fn source(&self) -> &str {
        match self {
            SchedulerEvent::RunStarted { source }
            | SchedulerEvent::RunCompleted { source, .. }
            | SchedulerEvent::TriggerSkipped { source }
            | SchedulerEvent::HealthChanged { source, .. } => source,
        }
    }
}
