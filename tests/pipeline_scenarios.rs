//! ---
//! ingest_section: "15-testing-qa-runbook"
//! ingest_subsection: "integration-tests"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "End-to-end scheduling, normalization, and health scenarios."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use crm_ingest_envelope::Envelope;
use crm_ingest_producer::{
    HttpRecordSource, Producer, ProducerError, ProducerRegistry, RecordFailureReason, RunOutcome,
    SourceProducer,
};
use crm_ingest_publisher::{InMemoryQueue, Publisher, RetryPolicy};
use crm_ingest_scheduler::{ProducerSchedule, Scheduler, SchedulerEvent, SchedulerSettings};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

async fn wait_for<T>(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    mut pick: impl FnMut(SchedulerEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected scheduler event")
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        worker_pool_size: 2,
        run_timeout: Duration::from_secs(5),
        unhealthy_threshold: 3,
        max_backoff: Duration::from_secs(1),
        initial_jitter: Duration::ZERO,
        shutdown_grace: Duration::from_millis(200),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_with_one_missing_id_publishes_the_rest() {
    let router = Router::new().route(
        "/customers",
        get(|| async {
            Json(json!([
                {"id": "c-1", "name": "Ada", "email": "ada@example.com"},
                {"name": "Nameless", "email": "nobody@example.com"},
                {"id": "c-3", "name": "Grace", "segment": "enterprise"}
            ]))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let source =
        HttpRecordSource::new(format!("http://{addr}/customers"), Duration::from_secs(5)).unwrap();
    let mut builder = ProducerRegistry::builder();
    builder
        .register(Arc::new(SourceProducer::new("crm-customers", source)))
        .unwrap();

    let queue = Arc::new(InMemoryQueue::new());
    let publisher = Arc::new(
        Publisher::new(queue.clone(), RetryPolicy::default(), "external-data")
            .with_topic("crm-customers", "crm.customers"),
    );
    let scheduler = Scheduler::new(
        builder.build(),
        publisher,
        settings(),
        [(
            "crm-customers".to_owned(),
            ProducerSchedule::every(Duration::from_secs(3600)),
        )],
        None,
    )
    .unwrap();
    let mut events = scheduler.subscribe();
    let handle = scheduler.start();

    let outcome = wait_for(&mut events, |event| match event {
        SchedulerEvent::RunCompleted { outcome, .. } => Some(outcome),
        _ => None,
    })
    .await;
    handle.shutdown().await;

    match outcome {
        RunOutcome::PartialFailure {
            published,
            failures,
        } => {
            assert_eq!(published, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert!(matches!(failures[0].reason, RecordFailureReason::Normalize(_)));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }

    let messages = queue.messages_for("crm.customers");
    let ids: Vec<_> = messages.iter().map(|message| message.key.as_str()).collect();
    assert_eq!(ids, vec!["c-1", "c-3"]);
    let grace = messages[1].json().unwrap();
    assert_eq!(grace["name"], "Grace");
    assert!(grace.get("email").is_none());
    assert_eq!(grace["extension"]["segment"], "enterprise");
}

/// Hangs past its timeout for the first `hangs` runs, then publishes one envelope.
struct Recovering {
    hangs: usize,
    runs: AtomicUsize,
}

#[async_trait]
impl Producer for Recovering {
    fn source_name(&self) -> &str {
        "crm-customers"
    }

    async fn produce(&self, publisher: &Publisher) -> RunOutcome {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run < self.hangs {
            sleep(Duration::from_secs(30)).await;
        }
        let envelope = Envelope::new(format!("run-{run}")).unwrap();
        if publisher.publish("crm-customers", &envelope).await.is_delivered() {
            RunOutcome::Success { published: 1 }
        } else {
            RunOutcome::Fatal(ProducerError::Fetch("queue unavailable".into()))
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_timeouts_mark_unhealthy_and_a_success_restores_cadence() {
    let cadence = Duration::from_millis(60);
    let mut builder = ProducerRegistry::builder();
    builder
        .register(Arc::new(Recovering {
            hangs: 3,
            runs: AtomicUsize::new(0),
        }))
        .unwrap();
    let queue = Arc::new(InMemoryQueue::new());
    let scheduler = Scheduler::new(
        builder.build(),
        Arc::new(Publisher::new(queue.clone(), RetryPolicy::default(), "external-data")),
        settings(),
        [(
            "crm-customers".to_owned(),
            ProducerSchedule::every(cadence).with_timeout(Duration::from_millis(20)),
        )],
        None,
    )
    .unwrap();
    let mut events = scheduler.subscribe();
    let handle = scheduler.start();

    let failures = wait_for(&mut events, |event| match event {
        SchedulerEvent::HealthChanged {
            healthy: false,
            consecutive_failures,
            ..
        } => Some(consecutive_failures),
        _ => None,
    })
    .await;
    assert_eq!(failures, 3);
    let status = handle.status("crm-customers").unwrap();
    assert!(!status.healthy);
    assert!(status.current_interval > cadence);

    wait_for(&mut events, |event| match event {
        SchedulerEvent::HealthChanged { healthy: true, .. } => Some(()),
        _ => None,
    })
    .await;
    let status = handle.status("crm-customers").unwrap();
    assert!(status.healthy);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.current_interval, cadence);
    assert_eq!(queue.len(), 1, "only the successful run published");

    handle.shutdown().await;
}
