//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
//! Delivery of normalized envelopes to the message queue.
//!
//! The [`Publisher`] is shared by every producer. It retries transport failures with
//! exponential backoff and routes envelopes that exhaust their attempts to the
//! [`DeadLetterQueue`]. Delivery is at-least-once: a retried send may reach consumers
//! twice, and [`Envelope::idempotency_key`](crm_ingest_envelope::Envelope::idempotency_key)
//! is the key consumers deduplicate on.
#![warn(missing_docs)]

pub mod dead_letter;
pub mod metrics;
pub mod publisher;
pub mod retry;
pub mod transport;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use metrics::PublisherMetrics;
pub use publisher::{PublishOutcome, Publisher};
pub use retry::RetryPolicy;
pub use transport::{InMemoryQueue, QueueTransport, QueuedMessage, StdoutQueue, TransportError};
