//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use crm_ingest_common::PublisherConfig;
use crm_ingest_envelope::{Envelope, EnvelopeError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::metrics::PublisherMetrics;
use crate::retry::RetryPolicy;
use crate::transport::QueueTransport;

/// Result of delivering one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The queue acknowledged the envelope after `attempts` tries.
    Delivered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// Every attempt failed (or a permanent error occurred); the envelope is in the
    /// dead-letter backlog.
    DeadLettered {
        /// Attempts used before giving up.
        attempts: u32,
        /// Last transport error.
        reason: String,
    },
    /// The envelope violates its invariants and was never sent.
    Rejected(EnvelopeError),
}

impl PublishOutcome {
    /// Whether the queue acknowledged the envelope.
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }
}

/// Delivers envelopes to the queue on behalf of every producer.
///
/// Safe to share behind an `Arc`; concurrent `publish` calls from different producers
/// proceed independently and only the transport decides cross-call ordering.
pub struct Publisher {
    transport: Arc<dyn QueueTransport>,
    dead_letters: Arc<DeadLetterQueue>,
    policy: RetryPolicy,
    default_topic: String,
    topics: HashMap<String, String>,
    metrics: Option<PublisherMetrics>,
    rng: Mutex<StdRng>,
}

impl Publisher {
    /// Create a publisher sending to `default_topic` through `transport`.
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        policy: RetryPolicy,
        default_topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            dead_letters: Arc::new(DeadLetterQueue::new()),
            policy,
            default_topic: default_topic.into(),
            topics: HashMap::new(),
            metrics: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a publisher from the `[publisher]` configuration table.
    pub fn from_config(config: &PublisherConfig, transport: Arc<dyn QueueTransport>) -> Self {
        Self::new(
            transport,
            RetryPolicy::from(config),
            config.default_topic.clone(),
        )
    }

    /// Route envelopes from `source` to `topic` instead of the default topic.
    pub fn with_topic(mut self, source: impl Into<String>, topic: impl Into<String>) -> Self {
        self.topics.insert(source.into(), topic.into());
        self
    }

    /// Share an existing dead-letter backlog.
    pub fn with_dead_letters(mut self, dead_letters: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Report attempts and outcomes to Prometheus.
    pub fn with_metrics(mut self, metrics: PublisherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Seed the jitter RNG for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Topic used for envelopes emitted by `source`.
    pub fn topic_for(&self, source: &str) -> &str {
        self.topics
            .get(source)
            .map(String::as_str)
            .unwrap_or(&self.default_topic)
    }

    /// Backlog of envelopes that could not be delivered.
    pub fn dead_letters(&self) -> Arc<DeadLetterQueue> {
        self.dead_letters.clone()
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliver one envelope emitted by `source`.
    ///
    /// Invalid envelopes are rejected without touching the transport. Retryable
    /// transport failures are retried up to `max_attempts` total attempts with
    /// exponential backoff; on exhaustion, or on a permanent failure, the envelope is
    /// recorded exactly once in the dead-letter backlog.
    pub async fn publish(&self, source: &str, envelope: &Envelope) -> PublishOutcome {
        if let Err(err) = envelope.validate() {
            warn!(source, error = %err, "refusing to publish invalid envelope");
            if let Some(metrics) = &self.metrics {
                metrics.record_rejected(source);
            }
            return PublishOutcome::Rejected(err);
        }

        let payload = match serde_json::to_vec(envelope) {
            Ok(payload) => payload,
            Err(err) => {
                return self.dead_letter(source, envelope, 0, format!("serialization failed: {}", err));
            }
        };
        let topic = self.topic_for(source);
        let key = envelope.id.as_str();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(topic, key, &payload).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_attempt(source, true);
                        metrics.record_delivered(source);
                    }
                    debug!(source, topic, key, attempt, transport = self.transport.name(), "envelope delivered");
                    return PublishOutcome::Delivered { attempts: attempt };
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_attempt(source, false);
                    }
                    warn!(
                        source,
                        topic,
                        key,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        transport = self.transport.name(),
                        error = %err,
                        "publish attempt failed",
                    );
                    if !err.is_retryable() || attempt >= self.policy.max_attempts {
                        return self.dead_letter(source, envelope, attempt, err.to_string());
                    }
                    let delay = self.policy.backoff_delay(attempt, &mut self.rng.lock());
                    sleep(delay).await;
                }
            }
        }
    }

    fn dead_letter(
        &self,
        source: &str,
        envelope: &Envelope,
        attempts: u32,
        reason: String,
    ) -> PublishOutcome {
        error!(source, key = %envelope.id, attempts, reason = %reason, "routing envelope to dead-letter backlog");
        self.dead_letters.push(DeadLetter {
            source: source.to_owned(),
            envelope: envelope.clone(),
            reason: reason.clone(),
            attempts,
            failed_at: Utc::now(),
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_dead_letter(source);
        }
        PublishOutcome::DeadLettered { attempts, reason }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .field("default_topic", &self.default_topic)
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}
