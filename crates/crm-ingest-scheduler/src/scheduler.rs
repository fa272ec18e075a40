//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Scheduler lifecycle, per-producer trigger tasks, and the worker pool."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use crm_ingest_common::{AppConfig, ProducerConfig, SchedulerConfig};
use crm_ingest_producer::{Producer, ProducerError, ProducerRegistry, RunOutcome};
use crm_ingest_publisher::{DeadLetter, Publisher};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::entry::{HealthTransition, ScheduleEntry};
use crate::events::SchedulerEvent;
use crate::metrics::SchedulerMetrics;
use crate::status::{ProducerStatus, SchedulerView, SharedStatuses};

const EVENT_CAPACITY: usize = 256;
/// Deadline used when an interval would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Errors raised while building or driving the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no producer named '{0}' is registered")]
    UnknownProducer(String),
    #[error("producer '{0}' has no schedule")]
    MissingSchedule(String),
    #[error("producer '{0}' must use a cadence greater than zero")]
    ZeroCadence(String),
    #[error("producer '{0}' must use a run timeout greater than zero")]
    ZeroTimeout(String),
    #[error("worker pool size must be greater than zero")]
    ZeroWorkerPool,
    #[error("unhealthy threshold must be greater than zero")]
    ZeroThreshold,
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Global scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Upper bound on concurrently executing runs across all producers.
    pub worker_pool_size: usize,
    /// Run timeout for producers without an override.
    pub run_timeout: Duration,
    /// Consecutive fatal runs before a producer is flagged unhealthy.
    pub unhealthy_threshold: u32,
    /// Cap for the failure backoff interval.
    pub max_backoff: Duration,
    /// Upper bound of the random delay before each producer's first run.
    pub initial_jitter: Duration,
    /// How long shutdown waits for in-flight runs before cancelling them.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size,
            run_timeout: config.run_timeout,
            unhealthy_threshold: config.unhealthy_threshold,
            max_backoff: config.max_backoff,
            initial_jitter: config.initial_jitter,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

/// Cadence and optional timeout override for one producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSchedule {
    pub cadence: Duration,
    pub timeout: Option<Duration>,
}

impl ProducerSchedule {
    /// Run every `cadence` with the scheduler's default timeout.
    pub fn every(cadence: Duration) -> Self {
        Self {
            cadence,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&ProducerConfig> for ProducerSchedule {
    fn from(config: &ProducerConfig) -> Self {
        Self {
            cadence: config.cadence,
            timeout: config.timeout,
        }
    }
}

/// Long-lived scheduler instance, constructed once at startup.
pub struct Scheduler {
    registry: ProducerRegistry,
    publisher: Arc<Publisher>,
    settings: SchedulerSettings,
    schedules: IndexMap<String, ProducerSchedule>,
    metrics: Option<SchedulerMetrics>,
    events: broadcast::Sender<SchedulerEvent>,
    rng: StdRng,
}

impl Scheduler {
    /// Validate the registry against the schedules and settings.
    ///
    /// Every registered producer needs a schedule and every schedule must name a
    /// registered producer, with non-zero cadence and timeout.
    pub fn new(
        registry: ProducerRegistry,
        publisher: Arc<Publisher>,
        settings: SchedulerSettings,
        schedules: impl IntoIterator<Item = (String, ProducerSchedule)>,
        metrics: Option<SchedulerMetrics>,
    ) -> Result<Self, SchedulerError> {
        if settings.worker_pool_size == 0 {
            return Err(SchedulerError::ZeroWorkerPool);
        }
        if settings.unhealthy_threshold == 0 {
            return Err(SchedulerError::ZeroThreshold);
        }

        let schedules: IndexMap<String, ProducerSchedule> = schedules.into_iter().collect();
        for (source, schedule) in &schedules {
            if !registry.contains(source) {
                return Err(SchedulerError::UnknownProducer(source.clone()));
            }
            if schedule.cadence.is_zero() {
                return Err(SchedulerError::ZeroCadence(source.clone()));
            }
            if schedule.timeout.unwrap_or(settings.run_timeout).is_zero() {
                return Err(SchedulerError::ZeroTimeout(source.clone()));
            }
        }
        if let Some(source) = registry.names().into_iter().find(|name| !schedules.contains_key(name)) {
            return Err(SchedulerError::MissingSchedule(source));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            registry,
            publisher,
            settings,
            schedules,
            metrics,
            events,
            rng: StdRng::from_entropy(),
        })
    }

    /// Build from the loaded configuration, one schedule per `[producers.*]` table.
    pub fn from_config(
        registry: ProducerRegistry,
        publisher: Arc<Publisher>,
        config: &AppConfig,
        metrics: Option<SchedulerMetrics>,
    ) -> Result<Self, SchedulerError> {
        let schedules = config
            .producers
            .iter()
            .map(|(name, producer)| (name.clone(), ProducerSchedule::from(producer)));
        Self::new(
            registry,
            publisher,
            SchedulerSettings::from(&config.scheduler),
            schedules,
            metrics,
        )
    }

    /// Seed the first-run jitter RNG for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Receive lifecycle events. Subscribe before `start` to observe the first runs.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Spawn one trigger task per producer and return the lifecycle handle.
    pub fn start(mut self) -> SchedulerHandle {
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = Arc::new(Semaphore::new(self.settings.worker_pool_size));
        let statuses: SharedStatuses = Arc::default();
        let mut triggers = IndexMap::new();
        let mut tasks = Vec::new();

        for (source, producer) in self.registry.iter() {
            let Some(schedule) = self.schedules.get(source).copied() else {
                continue;
            };
            let entry = ScheduleEntry::new(source, schedule.cadence);
            statuses
                .write()
                .insert(source.to_owned(), entry.snapshot(false));

            let first_delay = jitter(&mut self.rng, self.settings.initial_jitter);
            let (manual_tx, manual_rx) = mpsc::channel(1);
            triggers.insert(source.to_owned(), manual_tx);

            let task = TriggerTask {
                producer: producer.clone(),
                publisher: self.publisher.clone(),
                pool: pool.clone(),
                entry,
                timeout: schedule.timeout.unwrap_or(self.settings.run_timeout),
                threshold: self.settings.unhealthy_threshold,
                max_backoff: self.settings.max_backoff,
                shutdown_grace: self.settings.shutdown_grace,
                statuses: statuses.clone(),
                events: self.events.clone(),
                metrics: self.metrics.clone(),
            };
            if let Some(metrics) = &self.metrics {
                metrics.set_health(source, true, 0);
            }
            debug!(source, first_run_in = ?first_delay, cadence = ?schedule.cadence, "scheduling producer");
            let shutdown_rx = shutdown_tx.subscribe();
            tasks.push((
                source.to_owned(),
                tokio::spawn(task.drive(first_delay, shutdown_rx, manual_rx)),
            ));
        }

        info!(
            producers = tasks.len(),
            worker_pool_size = self.settings.worker_pool_size,
            "scheduler started"
        );

        SchedulerHandle {
            view: SchedulerView {
                statuses,
                triggers: Arc::new(triggers),
                dead_letters: self.publisher.dead_letters(),
            },
            shutdown: shutdown_tx,
            tasks,
            events: self.events,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("schedules", &self.schedules)
            .finish_non_exhaustive()
    }
}

fn jitter(rng: &mut StdRng, max: Duration) -> Duration {
    if max.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_millis(rng.gen_range(0..=max.as_millis() as u64))
    }
}

fn deadline(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    view: SchedulerView,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Cloneable status and trigger access, e.g. for HTTP handlers.
    pub fn view(&self) -> SchedulerView {
        self.view.clone()
    }

    pub fn status(&self, source: &str) -> Option<ProducerStatus> {
        self.view.status(source)
    }

    pub fn statuses(&self) -> Vec<ProducerStatus> {
        self.view.statuses()
    }

    /// Request an immediate run of `source`.
    pub fn trigger(&self, source: &str) -> Result<(), SchedulerError> {
        self.view.trigger(source)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.view.dead_letters()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Stop issuing triggers, wait up to the grace period for in-flight runs, then cancel
    /// whatever is still running.
    pub async fn shutdown(self) {
        info!("scheduler shutdown requested");
        let _ = self.shutdown.send(());
        for (source, task) in self.tasks {
            if let Err(err) = task.await {
                error!(source = %source, error = %err, "trigger task join error");
            }
        }
        info!("scheduler shutdown complete");
    }
}

struct InFlight {
    handle: JoinHandle<(RunOutcome, Duration)>,
    triggered_at: Instant,
}

/// Owns one producer's schedule entry and drives its runs.
struct TriggerTask {
    producer: Arc<dyn Producer>,
    publisher: Arc<Publisher>,
    pool: Arc<Semaphore>,
    entry: ScheduleEntry,
    timeout: Duration,
    threshold: u32,
    max_backoff: Duration,
    shutdown_grace: Duration,
    statuses: SharedStatuses,
    events: broadcast::Sender<SchedulerEvent>,
    metrics: Option<SchedulerMetrics>,
}

impl TriggerTask {
    async fn drive(
        mut self,
        first_delay: Duration,
        mut shutdown: broadcast::Receiver<()>,
        mut manual: mpsc::Receiver<()>,
    ) {
        let mut next_due = deadline(Instant::now(), first_delay);
        let mut in_flight: Option<InFlight> = None;
        let mut manual_open = true;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                joined = async {
                    match in_flight.as_mut() {
                        Some(run) => (&mut run.handle).await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    if let Some(run) = in_flight.take() {
                        let (outcome, duration) = settle(joined, run.triggered_at);
                        self.complete(outcome, duration);
                        next_due = deadline(run.triggered_at, self.entry.interval());
                    }
                }
                _ = sleep_until(next_due) => {
                    next_due = deadline(Instant::now(), self.entry.interval());
                    self.fire(&mut in_flight, "schedule");
                }
                request = manual.recv(), if manual_open => match request {
                    Some(()) => self.fire(&mut in_flight, "manual"),
                    None => manual_open = false,
                },
            }
        }

        self.drain(in_flight).await;
    }

    fn fire(&mut self, in_flight: &mut Option<InFlight>, reason: &'static str) {
        let source = self.entry.source().to_owned();
        if in_flight.is_some() {
            self.entry.record_skip();
            if let Some(metrics) = &self.metrics {
                metrics.record_skip(&source);
            }
            warn!(source = %source, reason, "previous run still in flight, skipping trigger");
            let _ = self.events.send(SchedulerEvent::TriggerSkipped { source });
            self.publish_status(true);
            return;
        }

        debug!(source = %source, reason, "trigger fired");
        *in_flight = Some(InFlight {
            handle: self.spawn_run(),
            triggered_at: Instant::now(),
        });
        self.publish_status(true);
    }

    fn spawn_run(&self) -> JoinHandle<(RunOutcome, Duration)> {
        let producer = self.producer.clone();
        let publisher = self.publisher.clone();
        let pool = self.pool.clone();
        let events = self.events.clone();
        let timeout = self.timeout;
        let source = self.entry.source().to_owned();

        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return (RunOutcome::Fatal(ProducerError::Cancelled), Duration::ZERO);
            };
            debug!(source = %source, "run started");
            let _ = events.send(SchedulerEvent::RunStarted { source });
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, producer.produce(&publisher)).await {
                Ok(outcome) => outcome,
                Err(_) => RunOutcome::Fatal(ProducerError::Timeout(timeout)),
            };
            (outcome, started.elapsed())
        })
    }

    fn complete(&mut self, outcome: RunOutcome, duration: Duration) {
        let source = self.entry.source().to_owned();
        let transition = self
            .entry
            .record(&outcome, self.threshold, self.max_backoff);

        match &outcome {
            RunOutcome::Success { published } => {
                info!(source = %source, published, ?duration, "run succeeded")
            }
            RunOutcome::PartialFailure {
                published,
                failures,
            } => warn!(
                source = %source,
                published,
                failed = failures.len(),
                ?duration,
                "run finished with record failures"
            ),
            RunOutcome::Fatal(err) => error!(
                source = %source,
                error = %err,
                consecutive_failures = self.entry.consecutive_failures(),
                next_run_in = ?self.entry.interval(),
                "run failed"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_run(&source, outcome.kind(), duration);
            metrics.set_health(
                &source,
                self.entry.is_healthy(),
                self.entry.consecutive_failures(),
            );
        }

        self.publish_status(false);
        let health = transition.map(|transition| {
            let consecutive_failures = self.entry.consecutive_failures();
            match transition {
                HealthTransition::BecameUnhealthy => {
                    warn!(source = %source, consecutive_failures, "producer marked unhealthy")
                }
                HealthTransition::Recovered => info!(source = %source, "producer recovered"),
            }
            SchedulerEvent::HealthChanged {
                source: source.clone(),
                healthy: self.entry.is_healthy(),
                consecutive_failures,
            }
        });
        let _ = self.events.send(SchedulerEvent::RunCompleted {
            source,
            outcome,
            duration,
        });
        if let Some(event) = health {
            let _ = self.events.send(event);
        }
    }

    async fn drain(&mut self, in_flight: Option<InFlight>) {
        let source = self.entry.source().to_owned();
        if let Some(mut run) = in_flight {
            info!(source = %source, grace = ?self.shutdown_grace, "waiting for in-flight run");
            let (outcome, duration) =
                match tokio::time::timeout(self.shutdown_grace, &mut run.handle).await {
                    Ok(joined) => settle(joined, run.triggered_at),
                    Err(_) => {
                        run.handle.abort();
                        warn!(source = %source, "grace period elapsed, cancelling run");
                        (
                            RunOutcome::Fatal(ProducerError::Cancelled),
                            run.triggered_at.elapsed(),
                        )
                    }
                };
            self.complete(outcome, duration);
        }
        self.publish_status(false);
        debug!(source = %source, "trigger task stopped");
    }

    fn publish_status(&self, in_flight: bool) {
        self.statuses.write().insert(
            self.entry.source().to_owned(),
            self.entry.snapshot(in_flight),
        );
    }
}

/// Map a finished run task into an outcome, containing panics and cancellation.
fn settle(
    joined: Result<(RunOutcome, Duration), JoinError>,
    triggered_at: Instant,
) -> (RunOutcome, Duration) {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let message = panic_message(err);
            (
                RunOutcome::Fatal(ProducerError::Panicked(message)),
                triggered_at.elapsed(),
            )
        }
        Err(_) => (
            RunOutcome::Fatal(ProducerError::Cancelled),
            triggered_at.elapsed(),
        ),
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_owned()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "non-string panic payload".to_owned()
            }
        }
        Err(err) => err.to_string(),
    }
}
