//! ---
//! ingest_section: "04-producer-contract"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "JSON-over-HTTP record source and config-driven producer discovery."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use crm_ingest_common::{AppConfig, ProducerConfig};
use crm_ingest_envelope::{FieldMapping, RawRecord};
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::producer::Producer;
use crate::source::{RecordSource, SourceProducer};

/// Fetches a JSON array of records with a single GET request.
#[derive(Debug, Clone)]
pub struct HttpRecordSource {
    client: Client,
    url: String,
    records_pointer: Option<String>,
}

impl HttpRecordSource {
    /// Create a source for `url`. Requests time out after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            url: url.into(),
            records_pointer: None,
        })
    }

    /// Read the record array at this JSON pointer instead of the document root.
    pub fn with_records_pointer(mut self, pointer: impl Into<String>) -> Self {
        let pointer = pointer.into();
        self.records_pointer = (!pointer.is_empty()).then_some(pointer);
        self
    }

    /// Endpoint polled by this source.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch(&self, source_name: &str) -> Result<Vec<RawRecord>> {
        debug!(source = source_name, url = %self.url, "fetching records");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} responded with {}", self.url, status));
        }
        let mut document: JsonValue = response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", self.url))?;

        let records = match &self.records_pointer {
            Some(pointer) => document
                .pointer_mut(pointer)
                .map(JsonValue::take)
                .ok_or_else(|| anyhow!("{} has no value at '{}'", self.url, pointer))?,
            None => document,
        };
        match records {
            JsonValue::Array(items) => Ok(items),
            other => Err(anyhow!(
                "expected an array of records from {}, found {}",
                self.url,
                kind(&other)
            )),
        }
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Build the HTTP-backed producer for one `[producers.NAME]` table.
pub fn producer_from_config(
    source_name: &str,
    config: &ProducerConfig,
    default_timeout: Duration,
) -> Result<SourceProducer<HttpRecordSource>> {
    let mut source = HttpRecordSource::new(&config.url, config.timeout.unwrap_or(default_timeout))
        .with_context(|| format!("producer '{}'", source_name))?;
    if let Some(pointer) = &config.records_pointer {
        source = source.with_records_pointer(pointer.clone());
    }
    Ok(SourceProducer::new(source_name, source).with_mapping(FieldMapping::from(&config.fields)))
}

/// Discover every producer declared in the configuration, in declaration order.
pub fn producers_from_config(config: &AppConfig) -> Result<Vec<Arc<dyn Producer>>> {
    config
        .producers
        .iter()
        .map(|(name, producer)| {
            producer_from_config(name, producer, config.scheduler.run_timeout)
                .map(|producer| Arc::new(producer) as Arc<dyn Producer>)
        })
        .collect()
}
