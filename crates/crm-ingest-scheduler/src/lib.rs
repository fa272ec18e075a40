//! ---
//! ingest_section: "05-scheduling"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Producer scheduling, worker pool, and failure isolation."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
//! The scheduler drives every registered producer on its own cadence. Each producer gets an
//! independent trigger task; runs execute on a bounded worker pool, never overlap for the
//! same producer, and report outcomes back to the trigger task that owns the producer's
//! schedule entry.

pub mod entry;
pub mod events;
pub mod metrics;
pub mod scheduler;
pub mod status;

pub use entry::{HealthTransition, ScheduleEntry};
pub use events::SchedulerEvent;
pub use metrics::SchedulerMetrics;
pub use scheduler::{
    ProducerSchedule, Scheduler, SchedulerError, SchedulerHandle, SchedulerSettings,
};
pub use status::{ProducerStatus, SchedulerView};
