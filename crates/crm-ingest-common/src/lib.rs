//! ---
//! ingest_section: "01-core-functionality"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Shared primitives and utilities for the ingestion runtime."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
//! Core shared primitives for the CRM ingestion workspace.
//! This crate exposes configuration loading, logging, and version
//! metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, FieldMappingConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ProducerConfig,
    PublisherConfig, SchedulerConfig, TransportKind,
};
pub use logging::{init_console, init_tracing, LogFormat, LogTarget};
pub use version::VersionInfo;
