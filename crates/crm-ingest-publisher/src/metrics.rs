//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use crm_ingest_metrics::SharedRegistry;
use prometheus::{IntCounterVec, Opts};

/// Metrics published by the delivery pipeline.
#[derive(Clone)]
pub struct PublisherMetrics {
    attempts_total: IntCounterVec,
    delivered_total: IntCounterVec,
    dead_letters_total: IntCounterVec,
    rejected_total: IntCounterVec,
}

impl PublisherMetrics {
    /// Register the publisher metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_publish_attempts_total",
                "Delivery attempts made against the queue transport",
            ),
            &["source", "result"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let delivered_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_envelopes_delivered_total",
                "Envelopes acknowledged by the queue",
            ),
            &["source"],
        )?;
        registry.register(Box::new(delivered_total.clone()))?;

        let dead_letters_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_dead_letters_total",
                "Envelopes routed to the dead-letter backlog after exhausting attempts",
            ),
            &["source"],
        )?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new(
                "crm_ingest_envelopes_rejected_total",
                "Envelopes refused before sending because they violate invariants",
            ),
            &["source"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        Ok(Self {
            attempts_total,
            delivered_total,
            dead_letters_total,
            rejected_total,
        })
    }

    pub(crate) fn record_attempt(&self, source: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.attempts_total
            .with_label_values(&[source, result])
            .inc();
    }

    pub(crate) fn record_delivered(&self, source: &str) {
        self.delivered_total.with_label_values(&[source]).inc();
    }

    pub(crate) fn record_dead_letter(&self, source: &str) {
        self.dead_letters_total.with_label_values(&[source]).inc();
    }

    pub(crate) fn record_rejected(&self, source: &str) {
        self.rejected_total.with_label_values(&[source]).inc();
    }
}

impl std::fmt::Debug for PublisherMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherMetrics").finish_non_exhaustive()
    }
}
