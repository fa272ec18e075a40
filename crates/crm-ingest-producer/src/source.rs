//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Generic fetch, normalize, publish producer."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use async_trait::async_trait;
use crm_ingest_envelope::{FieldMapping, RawRecord};
use crm_ingest_publisher::{PublishOutcome, Publisher};
use tracing::{debug, info, warn};

use crate::outcome::{ProducerError, RecordFailure, RecordFailureReason, RunOutcome};
use crate::producer::Producer;

/// Fetches a batch of raw records from an external system.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the current batch. Errors abort the run as a whole.
    async fn fetch(&self, source_name: &str) -> anyhow::Result<Vec<RawRecord>>;
}

/// Producer that fetches a batch, normalizes each record, and publishes in order.
///
/// A bad record only fails itself; fetch errors fail the run.
pub struct SourceProducer<S> {
    name: String,
    source: S,
    mapping: FieldMapping,
}

impl<S: RecordSource> SourceProducer<S> {
    /// Wrap `source` under the given source name with the default field mapping.
    pub fn new(name: impl Into<String>, source: S) -> Self {
        Self {
            name: name.into(),
            source,
            mapping: FieldMapping::default(),
        }
    }

    /// Override the raw-to-canonical field mapping.
    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Field mapping in effect.
    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }
}

#[async_trait]
impl<S: RecordSource> Producer for SourceProducer<S> {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, publisher: &Publisher) -> RunOutcome {
        let records = match self.source.fetch(&self.name).await {
            Ok(records) => records,
            Err(err) => {
                warn!(source = %self.name, error = %format!("{:#}", err), "fetch failed");
                return RunOutcome::Fatal(ProducerError::Fetch(format!("{:#}", err)));
            }
        };
        debug!(source = %self.name, records = records.len(), "fetched batch");

        let mut published = 0;
        let mut failures = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let envelope = match self.mapping.normalize(record) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(source = %self.name, index, error = %err, "skipping record");
                    failures.push(RecordFailure {
                        index,
                        id: None,
                        reason: RecordFailureReason::Normalize(err),
                    });
                    continue;
                }
            };

            match publisher.publish(&self.name, &envelope).await {
                PublishOutcome::Delivered { .. } => published += 1,
                PublishOutcome::DeadLettered { attempts, reason } => failures.push(RecordFailure {
                    index,
                    id: Some(envelope.id),
                    reason: RecordFailureReason::Undelivered { attempts, reason },
                }),
                PublishOutcome::Rejected(err) => failures.push(RecordFailure {
                    index,
                    id: Some(envelope.id),
                    reason: RecordFailureReason::Rejected(err),
                }),
            }
        }

        info!(
            source = %self.name,
            published,
            failed = failures.len(),
            "run finished"
        );
        RunOutcome::from_records(published, failures)
    }
}

impl<S> std::fmt::Debug for SourceProducer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceProducer")
            .field("name", &self.name)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_ingest_publisher::{InMemoryQueue, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed(Vec<RawRecord>);

    #[async_trait]
    impl RecordSource for Fixed {
        async fn fetch(&self, _source_name: &str) -> anyhow::Result<Vec<RawRecord>> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl RecordSource for Down {
        async fn fetch(&self, _source_name: &str) -> anyhow::Result<Vec<RawRecord>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn publishes_records_in_fetch_order() {
        let queue = Arc::new(InMemoryQueue::new());
        let publisher = Publisher::new(queue.clone(), RetryPolicy::default(), "external-data");
        let producer = SourceProducer::new(
            "inventory-products",
            Fixed(vec![
                json!({"sku": "B-2", "title": "Bolt"}),
                json!({"sku": "A-1", "title": "Anchor"}),
            ]),
        )
        .with_mapping(FieldMapping {
            id: "sku".into(),
            name: "title".into(),
            email: "contact".into(),
        });

        let outcome = producer.produce(&publisher).await;
        assert_eq!(outcome, RunOutcome::Success { published: 2 });
        let keys: Vec<_> = queue.messages().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["B-2", "A-1"]);
        assert_eq!(queue.messages()[1].json().unwrap()["name"], "Anchor");
    }

    #[tokio::test]
    async fn fetch_errors_are_fatal() {
        let queue = Arc::new(InMemoryQueue::new());
        let publisher = Publisher::new(queue.clone(), RetryPolicy::default(), "external-data");
        let producer = SourceProducer::new("crm-customers", Down);

        let outcome = producer.produce(&publisher).await;
        assert!(matches!(outcome, RunOutcome::Fatal(ProducerError::Fetch(ref msg)) if msg.contains("connection refused")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_success() {
        let queue = Arc::new(InMemoryQueue::new());
        let publisher = Publisher::new(queue, RetryPolicy::default(), "external-data");
        let producer = SourceProducer::new("crm-customers", Fixed(Vec::new()));
        assert_eq!(
            producer.produce(&publisher).await,
            RunOutcome::Success { published: 0 }
        );
    }
}
