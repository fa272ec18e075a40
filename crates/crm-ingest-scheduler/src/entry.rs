//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Per-producer schedule entry with failure backoff and health."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use crm_ingest_producer::{OutcomeKind, RunOutcome};

use crate::status::ProducerStatus;

/// Health transition caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// The producer crossed the failure threshold.
    BecameUnhealthy,
    /// A successful run restored health.
    Recovered,
}

/// Scheduling state for one producer. Owned by that producer's trigger task.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    source: String,
    cadence: Duration,
    interval: Duration,
    consecutive_failures: u32,
    healthy: bool,
    last_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<OutcomeKind>,
    last_summary: Option<String>,
    runs_total: u64,
    skipped_triggers: u64,
}

impl ScheduleEntry {
    /// Fresh entry running at its base cadence.
    pub fn new(source: impl Into<String>, cadence: Duration) -> Self {
        Self {
            source: source.into(),
            cadence,
            interval: cadence,
            consecutive_failures: 0,
            healthy: true,
            last_run_at: None,
            last_outcome: None,
            last_summary: None,
            runs_total: 0,
            skipped_triggers: 0,
        }
    }

    /// Fold a finished run into the entry.
    ///
    /// `Fatal` outcomes, and partial failures that delivered nothing, increment the failure
    /// count and double the interval starting from the cadence, capped at
    /// `max(max_backoff, cadence)`. Only `Success` resets the count and restores the cadence;
    /// a partial failure that delivered some records leaves both untouched.
    pub fn record(
        &mut self,
        outcome: &RunOutcome,
        threshold: u32,
        max_backoff: Duration,
    ) -> Option<HealthTransition> {
        self.runs_total += 1;
        self.last_run_at = Some(Utc::now());
        self.last_outcome = Some(outcome.kind());
        self.last_summary = Some(outcome.summary());

        let was_healthy = self.healthy;
        match outcome {
            RunOutcome::Success { .. } => {
                self.consecutive_failures = 0;
                self.interval = self.cadence;
                self.healthy = true;
            }
            RunOutcome::PartialFailure { published, .. } if *published > 0 => {}
            RunOutcome::PartialFailure { .. } | RunOutcome::Fatal(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.interval =
                    backoff_interval(self.cadence, self.consecutive_failures, max_backoff);
                if self.consecutive_failures >= threshold {
                    self.healthy = false;
                }
            }
        }

        match (was_healthy, self.healthy) {
            (true, false) => Some(HealthTransition::BecameUnhealthy),
            (false, true) => Some(HealthTransition::Recovered),
            _ => None,
        }
    }

    /// Count a trigger that fired while a run was in flight.
    pub fn record_skip(&mut self) {
        self.skipped_triggers += 1;
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Delay until the next trigger, including failure backoff.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    pub fn last_outcome(&self) -> Option<OutcomeKind> {
        self.last_outcome
    }

    pub fn runs_total(&self) -> u64 {
        self.runs_total
    }

    pub fn skipped_triggers(&self) -> u64 {
        self.skipped_triggers
    }

    /// Status snapshot published to the shared status map.
    pub fn snapshot(&self, in_flight: bool) -> ProducerStatus {
        ProducerStatus {
            source: self.source.clone(),
            healthy: self.healthy,
            in_flight,
            consecutive_failures: self.consecutive_failures,
            cadence: self.cadence,
            current_interval: self.interval,
            last_run_at: self.last_run_at,
            last_outcome: self.last_outcome,
            last_summary: self.last_summary.clone(),
            runs_total: self.runs_total,
            skipped_triggers: self.skipped_triggers,
        }
    }
}

fn backoff_interval(cadence: Duration, failures: u32, max_backoff: Duration) -> Duration {
    let cap = max_backoff.max(cadence);
    let exponent = failures.min(20);
    cadence.saturating_mul(2u32.pow(exponent)).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_ingest_producer::{ProducerError, RecordFailure, RecordFailureReason};

    fn timeout() -> RunOutcome {
        RunOutcome::Fatal(ProducerError::Timeout(Duration::from_secs(30)))
    }

    #[test]
    fn three_timeouts_mark_unhealthy_and_success_recovers() {
        let cadence = Duration::from_secs(60);
        let max_backoff = Duration::from_secs(900);
        let mut entry = ScheduleEntry::new("crm-customers", cadence);

        assert_eq!(entry.record(&timeout(), 3, max_backoff), None);
        assert_eq!(entry.interval(), Duration::from_secs(120));
        assert_eq!(entry.record(&timeout(), 3, max_backoff), None);
        assert!(entry.is_healthy());
        assert_eq!(
            entry.record(&timeout(), 3, max_backoff),
            Some(HealthTransition::BecameUnhealthy)
        );
        assert!(!entry.is_healthy());
        assert_eq!(entry.consecutive_failures(), 3);
        assert_eq!(entry.interval(), Duration::from_secs(480));
        assert!(entry.interval() > cadence);

        assert_eq!(
            entry.record(&RunOutcome::Success { published: 5 }, 3, max_backoff),
            Some(HealthTransition::Recovered)
        );
        assert!(entry.is_healthy());
        assert_eq!(entry.consecutive_failures(), 0);
        assert_eq!(entry.interval(), cadence);
        assert_eq!(entry.runs_total(), 4);
    }

    #[test]
    fn backoff_is_capped() {
        let mut entry = ScheduleEntry::new("inventory-products", Duration::from_secs(60));
        for _ in 0..10 {
            entry.record(&timeout(), 3, Duration::from_secs(300));
        }
        assert_eq!(entry.interval(), Duration::from_secs(300));
    }

    #[test]
    fn cap_below_cadence_keeps_cadence() {
        let mut entry = ScheduleEntry::new("slow", Duration::from_secs(3600));
        entry.record(&timeout(), 3, Duration::from_secs(60));
        assert_eq!(entry.interval(), Duration::from_secs(3600));
    }

    fn undelivered(count: usize) -> Vec<RecordFailure> {
        (0..count)
            .map(|index| RecordFailure {
                index,
                id: Some(index.to_string()),
                reason: RecordFailureReason::Undelivered {
                    attempts: 3,
                    reason: "queue unavailable".into(),
                },
            })
            .collect()
    }

    fn dead_lettered(count: usize) -> RunOutcome {
        RunOutcome::PartialFailure {
            published: 0,
            failures: undelivered(count),
        }
    }

    #[test]
    fn partial_failure_with_deliveries_keeps_failure_count() {
        let max_backoff = Duration::from_secs(900);
        let mut entry = ScheduleEntry::new("crm-customers", Duration::from_secs(60));
        entry.record(&timeout(), 3, max_backoff);
        let partial = RunOutcome::PartialFailure {
            published: 1,
            failures: undelivered(1),
        };
        assert_eq!(entry.record(&partial, 3, max_backoff), None);
        assert_eq!(entry.consecutive_failures(), 1);
        assert_eq!(entry.interval(), Duration::from_secs(120));
        assert!(entry.is_healthy());
        assert_eq!(entry.last_outcome(), Some(OutcomeKind::PartialFailure));
    }

    #[test]
    fn run_that_dead_letters_everything_counts_as_failure() {
        let max_backoff = Duration::from_secs(900);
        let mut entry = ScheduleEntry::new("crm-customers", Duration::from_secs(60));
        for _ in 0..3 {
            entry.record(&timeout(), 3, max_backoff);
        }
        assert!(!entry.is_healthy());

        assert_eq!(entry.record(&dead_lettered(3), 3, max_backoff), None);
        assert!(!entry.is_healthy());
        assert_eq!(entry.consecutive_failures(), 4);
        assert_eq!(entry.interval(), Duration::from_secs(900));
    }

    #[test]
    fn dead_lettered_runs_reach_threshold_between_fatal_runs() {
        let max_backoff = Duration::from_secs(900);
        let mut entry = ScheduleEntry::new("crm-customers", Duration::from_secs(60));
        entry.record(&timeout(), 3, max_backoff);
        entry.record(&dead_lettered(2), 3, max_backoff);
        assert_eq!(
            entry.record(&timeout(), 3, max_backoff),
            Some(HealthTransition::BecameUnhealthy)
        );
        assert_eq!(entry.consecutive_failures(), 3);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut entry = ScheduleEntry::new("crm-customers", Duration::from_secs(60));
        entry.record_skip();
        let status = entry.snapshot(true);
        assert!(status.in_flight);
        assert_eq!(status.skipped_triggers, 1);
        assert!(status.last_run_at.is_none());
    }
}
