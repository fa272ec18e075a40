//! ---
//! ingest_section: "02-envelope-data-model"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Envelope model and normalization helpers."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
//! The envelope is the unit moving through the pipeline: producers normalize raw
//! source records into envelopes, the publisher serializes and delivers them.
#![warn(missing_docs)]

pub mod envelope;
pub mod normalize;

pub use envelope::{Envelope, EnvelopeError, Extension, CANONICAL_FIELDS};
pub use normalize::{FieldMapping, NormalizeError, RawRecord};
