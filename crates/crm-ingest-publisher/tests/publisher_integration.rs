//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "tests"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crm_ingest_envelope::Envelope;
use crm_ingest_publisher::{
    InMemoryQueue, PublishOutcome, Publisher, QueueTransport, RetryPolicy, TransportError,
};
use parking_lot::Mutex;

/// Fails the first `failures` sends, then forwards to an in-memory queue.
struct Flaky {
    remaining_failures: Mutex<u32>,
    sent_at: Mutex<Vec<Instant>>,
    inner: InMemoryQueue,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: Mutex::new(failures),
            sent_at: Mutex::new(Vec::new()),
            inner: InMemoryQueue::new(),
        }
    }
}

#[async_trait]
impl QueueTransport for Flaky {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.sent_at.lock().push(Instant::now());
        {
            let mut remaining = self.remaining_failures.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Unavailable("leader election in progress".into()));
            }
        }
        self.inner.send(topic, key, payload).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn two_failures_then_success_delivers_once_after_two_backoffs() {
    let transport = Arc::new(Flaky::new(2));
    let policy = RetryPolicy::new(
        3,
        Duration::from_millis(20),
        Duration::from_millis(100),
        Duration::ZERO,
    );
    let publisher = Publisher::new(transport.clone(), policy, "crm.customers").with_seed(1);
    let envelope = Envelope::new("42")
        .unwrap()
        .with_email("customer42@example.com");

    let outcome = publisher.publish("crm-customers", &envelope).await;
    assert_eq!(outcome, PublishOutcome::Delivered { attempts: 3 });

    let delivered = transport.inner.messages();
    assert_eq!(delivered.len(), 1, "delivered exactly once");
    assert_eq!(delivered[0].key, "42");
    assert!(publisher.dead_letters().is_empty());

    let sent_at = transport.sent_at.lock().clone();
    assert_eq!(sent_at.len(), 3);
    assert!(sent_at[1] - sent_at[0] >= Duration::from_millis(20));
    assert!(sent_at[2] - sent_at[1] >= Duration::from_millis(40));
}

#[tokio::test]
async fn failures_beyond_cap_are_dead_lettered_with_source() {
    let transport = Arc::new(Flaky::new(10));
    let policy = RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(2),
        Duration::from_millis(1),
    );
    let publisher = Publisher::new(transport.clone(), policy, "crm.customers");

    let outcome = publisher
        .publish("crm-customers", &Envelope::new("7").unwrap())
        .await;
    assert!(matches!(outcome, PublishOutcome::DeadLettered { attempts: 3, .. }));
    assert_eq!(transport.sent_at.lock().len(), 3, "exactly max attempts");
    assert!(transport.inner.is_empty());

    let letters = publisher.dead_letters().entries_for("crm-customers");
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].envelope.id, "7");
    assert!(letters[0].reason.contains("leader election"));
}

#[tokio::test]
async fn concurrent_producers_share_one_publisher() {
    let queue = Arc::new(InMemoryQueue::new());
    let publisher = Arc::new(
        Publisher::new(queue.clone(), RetryPolicy::default(), "external-data")
            .with_topic("inventory-products", "inventory.products"),
    );

    let mut tasks = Vec::new();
    for source in ["crm-customers", "inventory-products"] {
        let publisher = publisher.clone();
        tasks.push(tokio::spawn(async move {
            for id in 0..25 {
                let envelope = Envelope::new(id.to_string()).unwrap();
                assert!(publisher.publish(source, &envelope).await.is_delivered());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(queue.len(), 50);
    let products: Vec<_> = queue
        .messages_for("inventory.products")
        .into_iter()
        .map(|message| message.key)
        .collect();
    let expected: Vec<_> = (0..25).map(|id| id.to_string()).collect();
    assert_eq!(products, expected, "per-producer emission order preserved");
}
