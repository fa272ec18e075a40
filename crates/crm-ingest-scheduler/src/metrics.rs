//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Prometheus metrics for producer runs and health."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::time::Duration;

use crm_ingest_metrics::SharedRegistry;
use crm_ingest_producer::OutcomeKind;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};

/// Metrics published by the scheduler.
#[derive(Clone)]
pub struct SchedulerMetrics {
    runs_total: IntCounterVec,
    consecutive_failures: IntGaugeVec,
    healthy: IntGaugeVec,
    skipped_triggers_total: IntCounterVec,
    run_seconds: HistogramVec,
}

impl SchedulerMetrics {
    /// Register the scheduler metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let runs_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_producer_runs_total",
                "Completed producer runs by outcome",
            ),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "crm_ingest_producer_consecutive_failures",
                "Consecutive fatal runs per producer",
            ),
            &["source"],
        )?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let healthy = IntGaugeVec::new(
            Opts::new(
                "crm_ingest_producer_healthy",
                "1 when the producer is below the unhealthy threshold",
            ),
            &["source"],
        )?;
        registry.register(Box::new(healthy.clone()))?;

        let skipped_triggers_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_producer_skipped_triggers_total",
                "Triggers skipped because the previous run was still in flight",
            ),
            &["source"],
        )?;
        registry.register(Box::new(skipped_triggers_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "crm_ingest_producer_run_seconds",
            "Wall-clock duration of producer runs, excluding time queued for a worker",
        )
        .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?);
        let run_seconds = HistogramVec::new(histogram_opts, &["source"])?;
        registry.register(Box::new(run_seconds.clone()))?;

        Ok(Self {
            runs_total,
            consecutive_failures,
            healthy,
            skipped_triggers_total,
            run_seconds,
        })
    }

    pub(crate) fn record_run(&self, source: &str, outcome: OutcomeKind, duration: Duration) {
        self.runs_total
            .with_label_values(&[source, outcome.as_str()])
            .inc();
        self.run_seconds
            .with_label_values(&[source])
            .observe(duration.as_secs_f64());
    }

    pub(crate) fn set_health(&self, source: &str, healthy: bool, consecutive_failures: u32) {
        self.healthy
            .with_label_values(&[source])
            .set(i64::from(healthy));
        self.consecutive_failures
            .with_label_values(&[source])
            .set(i64::from(consecutive_failures));
    }

    pub(crate) fn record_skip(&self, source: &str) {
        self.skipped_triggers_total
            .with_label_values(&[source])
            .inc();
    }
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics").finish_non_exhaustive()
    }
}
