//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Registry of producers assembled once at startup."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::producer::Producer;

/// Errors raised while assembling the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two producers claimed the same source name.
    #[error("producer '{0}' is already registered")]
    DuplicateSource(String),
    /// A producer reported an empty or whitespace-only source name.
    #[error("producer source name must not be blank")]
    BlankSourceName,
}

/// Collects producers before the scheduler starts.
#[derive(Default)]
pub struct RegistryBuilder {
    producers: IndexMap<String, Arc<dyn Producer>>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a producer; its source name must be unique and non-blank.
    pub fn register(&mut self, producer: Arc<dyn Producer>) -> Result<&mut Self, RegistryError> {
        let name = producer.source_name().to_owned();
        if name.trim().is_empty() {
            return Err(RegistryError::BlankSourceName);
        }
        if self.producers.contains_key(&name) {
            return Err(RegistryError::DuplicateSource(name));
        }
        debug!(source = %name, "registered producer");
        self.producers.insert(name, producer);
        Ok(self)
    }

    /// Add every producer from an iterator, stopping at the first conflict.
    pub fn register_all<I>(&mut self, producers: I) -> Result<&mut Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Producer>>,
    {
        for producer in producers {
            self.register(producer)?;
        }
        Ok(self)
    }

    /// Freeze the registry. No producers can be added afterwards.
    pub fn build(self) -> ProducerRegistry {
        ProducerRegistry {
            producers: self.producers,
        }
    }
}

/// Immutable set of producers, iterated in registration order.
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    producers: IndexMap<String, Arc<dyn Producer>>,
}

impl ProducerRegistry {
    /// Start assembling a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a producer by source name.
    pub fn get(&self, source_name: &str) -> Option<Arc<dyn Producer>> {
        self.producers.get(source_name).cloned()
    }

    /// Whether a producer with this source name exists.
    pub fn contains(&self, source_name: &str) -> bool {
        self.producers.contains_key(source_name)
    }

    /// Iterate producers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Producer>)> {
        self.producers
            .iter()
            .map(|(name, producer)| (name.as_str(), producer))
    }

    /// Registered source names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.producers.keys().cloned().collect()
    }

    /// Number of registered producers.
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("producers", &self.producers.keys().collect::<Vec<_>>())
            .finish()
    }
}
