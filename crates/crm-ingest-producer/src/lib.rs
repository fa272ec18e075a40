//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Producer contract, registry, and record sources."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
//! Producers are the pluggable sources of the pipeline. Each one fetches from a single
//! external system, normalizes what it gets into envelopes and hands them to the shared
//! publisher. New source types implement [`Producer`] (or [`RecordSource`] for the common
//! fetch-normalize-publish shape) and are registered once at startup.
#![warn(missing_docs)]

pub mod http;
pub mod outcome;
pub mod producer;
pub mod registry;
pub mod source;

pub use http::{producer_from_config, producers_from_config, HttpRecordSource};
pub use outcome::{OutcomeKind, ProducerError, RecordFailure, RecordFailureReason, RunOutcome};
pub use producer::Producer;
pub use registry::{ProducerRegistry, RegistryBuilder, RegistryError};
pub use source::{RecordSource, SourceProducer};
