//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Trait implemented by every pluggable source."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use async_trait::async_trait;
use crm_ingest_publisher::Publisher;

use crate::outcome::RunOutcome;

/// A pluggable source of external records.
///
/// Implementations must be safe to invoke from any worker task. The scheduler never
/// runs two instances of the same producer concurrently, so implementations do not
/// need to guard against self-overlap. A run may be cancelled at any `.await` point
/// (timeout or shutdown), so envelopes already handed to the publisher count as emitted.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Unique, stable name of the source. Used for scheduling, logs, metrics, and
    /// dead-letter tagging.
    fn source_name(&self) -> &str;

    /// Perform one ingestion run, publishing every envelope through `publisher`.
    async fn produce(&self, publisher: &Publisher) -> RunOutcome;
}
