//! ---
//! ingest_section: "01-core-functionality"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Shared primitives and utilities for the ingestion runtime."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::{LogFormat, LogTarget};

/// Upper bound for every scheduling interval read from configuration.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn ensure_bounded(field: &str, value: Duration) -> Result<()> {
    if value > MAX_INTERVAL {
        return Err(anyhow!(
            "{} must not exceed {} seconds",
            field,
            MAX_INTERVAL.as_secs()
        ));
    }
    Ok(())
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(900)
}

fn default_initial_jitter() -> Duration {
    Duration::from_millis(2_000)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_topic() -> String {
    "external-data".to_owned()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_millis(5_000)
}

fn default_retry_jitter() -> Duration {
    Duration::from_millis(50)
}

fn default_cadence() -> Duration {
    Duration::from_secs(60)
}

fn default_id_field() -> String {
    "id".to_owned()
}

fn default_name_field() -> String {
    "name".to_owned()
}

fn default_email_field() -> String {
    "email".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the ingestion daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Producers keyed by source name, in declaration order.
    #[serde(default)]
    pub producers: IndexMap<String, ProducerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CRM_INGEST_CONFIG";

    /// Load configuration from disk, respecting the `CRM_INGEST_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read, parse and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a producer configuration by source name.
    pub fn producer(&self, source_name: &str) -> Option<&ProducerConfig> {
        self.producers.get(source_name)
    }

    /// Run timeout effective for the given producer.
    pub fn run_timeout_for(&self, source_name: &str) -> Duration {
        self.producer(source_name)
            .and_then(|producer| producer.timeout)
            .unwrap_or(self.scheduler.run_timeout)
    }

    /// Logging settings for the `run` command.
    ///
    /// The stdout transport writes queue records to stdout, so console logs move to stderr.
    pub fn run_logging(&self) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if self.publisher.transport == TransportKind::Stdout {
            logging.console = LogTarget::Stderr;
        }
        logging
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.producers.is_empty() {
            return Err(anyhow!("configuration must declare at least one producer"));
        }
        self.scheduler.validate()?;
        self.publisher.validate()?;
        for (source_name, producer) in &self.producers {
            producer.validate(source_name)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Global scheduling and failure-isolation parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_run_timeout", rename = "run_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub run_timeout: Duration,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_max_backoff", rename = "max_backoff_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_backoff: Duration,
    #[serde(default = "default_initial_jitter", rename = "initial_jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_jitter: Duration,
    #[serde(default = "default_shutdown_grace", rename = "shutdown_grace_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            run_timeout: default_run_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            max_backoff: default_max_backoff(),
            initial_jitter: default_initial_jitter(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(anyhow!("scheduler.worker_pool_size must be greater than zero"));
        }
        if self.run_timeout.is_zero() {
            return Err(anyhow!("scheduler.run_timeout_secs must be greater than zero"));
        }
        if self.unhealthy_threshold == 0 {
            return Err(anyhow!(
                "scheduler.unhealthy_threshold must be greater than zero"
            ));
        }
        ensure_bounded("scheduler.run_timeout_secs", self.run_timeout)?;
        ensure_bounded("scheduler.max_backoff_secs", self.max_backoff)?;
        ensure_bounded("scheduler.initial_jitter_ms", self.initial_jitter)?;
        ensure_bounded("scheduler.shutdown_grace_secs", self.shutdown_grace)?;
        Ok(())
    }
}

/// Queue transports the daemon knows how to construct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// JSON lines written to stdout, one record per line.
    #[default]
    Stdout,
    /// Process-local queue, useful for dry runs.
    InMemory,
}

/// Delivery parameters for the publisher.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_topic")]
    pub default_topic: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", rename = "base_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", rename = "max_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    #[serde(default = "default_retry_jitter", rename = "jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub jitter: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            default_topic: default_topic(),
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_retry_jitter(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("publisher.max_attempts must be greater than zero"));
        }
        if self.default_topic.trim().is_empty() {
            return Err(anyhow!("publisher.default_topic must not be blank"));
        }
        if self.max_delay < self.base_delay {
            return Err(anyhow!(
                "publisher.max_delay_ms must not be smaller than publisher.base_delay_ms"
            ));
        }
        Ok(())
    }
}

/// Per-producer settings discovered from the `[producers.<name>]` tables.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub url: String,
    #[serde(default = "default_cadence", rename = "cadence_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cadence: Duration,
    #[serde(default, rename = "timeout_secs")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub topic: Option<String>,
    /// JSON pointer locating the record array inside the response body.
    #[serde(default)]
    pub records_pointer: Option<String>,
    #[serde(default)]
    pub fields: FieldMappingConfig,
}

impl ProducerConfig {
    pub fn validate(&self, source_name: &str) -> Result<()> {
        if source_name.trim().is_empty() {
            return Err(anyhow!("producer names must not be blank"));
        }
        url::Url::parse(&self.url)
            .with_context(|| format!("producer '{}' has an invalid url", source_name))?;
        if self.cadence.is_zero() {
            return Err(anyhow!(
                "producer '{}' must use a cadence greater than zero",
                source_name
            ));
        }
        ensure_bounded(&format!("producer '{}' cadence_secs", source_name), self.cadence)?;
        if let Some(timeout) = self.timeout {
            ensure_bounded(&format!("producer '{}' timeout_secs", source_name), timeout)?;
        }
        if matches!(self.timeout, Some(timeout) if timeout.is_zero()) {
            return Err(anyhow!(
                "producer '{}' must use a timeout greater than zero",
                source_name
            ));
        }
        if let Some(topic) = &self.topic {
            if topic.trim().is_empty() {
                return Err(anyhow!("producer '{}' has a blank topic", source_name));
            }
        }
        if let Some(pointer) = &self.records_pointer {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(anyhow!(
                    "producer '{}' records_pointer must be empty or start with '/'",
                    source_name
                ));
            }
        }
        self.fields.validate(source_name)
    }
}

/// Names of the raw fields mapped onto canonical envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMappingConfig {
    #[serde(default = "default_id_field")]
    pub id: String,
    #[serde(default = "default_name_field")]
    pub name: String,
    #[serde(default = "default_email_field")]
    pub email: String,
}

impl Default for FieldMappingConfig {
    fn default() -> Self {
        Self {
            id: default_id_field(),
            name: default_name_field(),
            email: default_email_field(),
        }
    }
}

impl FieldMappingConfig {
    pub fn validate(&self, source_name: &str) -> Result<()> {
        let fields = [&self.id, &self.name, &self.email];
        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(anyhow!(
                "producer '{}' maps a canonical field to a blank raw field",
                source_name
            ));
        }
        if self.id == self.name || self.id == self.email || self.name == self.email {
            return Err(anyhow!(
                "producer '{}' maps two canonical fields to the same raw field",
                source_name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub console: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            console: LogTarget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [scheduler]
        worker_pool_size = 2
        run_timeout_secs = 15
        unhealthy_threshold = 3
        initial_jitter_ms = 0

        [publisher]
        transport = "in_memory"
        max_attempts = 5
        base_delay_ms = 10
        max_delay_ms = 100

        [producers.crm-customers]
        url = "http://localhost:8081/customers"
        cadence_secs = 60
        topic = "crm.customers"

        [producers.inventory-products]
        url = "http://localhost:8082/products"
        cadence_secs = 120
        timeout_secs = 5
        [producers.inventory-products.fields]
        email = "contact"
    "#;

    #[test]
    fn parses_full_document() {
        let config: AppConfig = SAMPLE.parse().expect("valid config");
        assert_eq!(config.scheduler.worker_pool_size, 2);
        assert_eq!(config.scheduler.run_timeout, Duration::from_secs(15));
        assert_eq!(config.scheduler.initial_jitter, Duration::ZERO);
        assert_eq!(config.publisher.transport, TransportKind::InMemory);
        assert_eq!(config.publisher.max_attempts, 5);
        assert_eq!(config.publisher.base_delay, Duration::from_millis(10));
        assert_eq!(config.publisher.default_topic, "external-data");

        let names: Vec<_> = config.producers.keys().cloned().collect();
        assert_eq!(names, vec!["crm-customers", "inventory-products"]);
        let products = config.producer("inventory-products").unwrap();
        assert_eq!(products.fields.email, "contact");
        assert_eq!(products.fields.id, "id");
        assert_eq!(config.run_timeout_for("inventory-products"), Duration::from_secs(5));
        assert_eq!(config.run_timeout_for("crm-customers"), Duration::from_secs(15));
    }

    #[test]
    fn rejects_zero_cadence() {
        let doc = r#"
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
            cadence_secs = 0
        "#;
        let err = doc.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("cadence"));
    }

    #[test]
    fn rejects_intervals_beyond_a_year() {
        let doc = r#"
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
            cadence_secs = 1000000000000
        "#;
        let err = doc.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("cadence_secs"));

        let doc = r#"
            [scheduler]
            max_backoff_secs = 1000000000000
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
        "#;
        let err = doc.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("max_backoff_secs"));
    }

    #[test]
    fn rejects_empty_producer_set_and_zero_pool() {
        assert!("".parse::<AppConfig>().is_err());
        let doc = r#"
            [scheduler]
            worker_pool_size = 0
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
        "#;
        let err = doc.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("worker_pool_size"));
    }

    #[test]
    fn rejects_invalid_url_and_pointer() {
        let doc = r#"
            [producers.crm-customers]
            url = "not a url"
        "#;
        assert!(doc.parse::<AppConfig>().is_err());
        let doc = r#"
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
            records_pointer = "data"
        "#;
        assert!(doc.parse::<AppConfig>().is_err());
    }

    #[test]
    fn stdout_transport_moves_console_logs_to_stderr() {
        let doc = r#"
            [producers.crm-customers]
            url = "http://localhost:8081/customers"
        "#;
        let config: AppConfig = doc.parse().unwrap();
        assert_eq!(config.publisher.transport, TransportKind::Stdout);
        assert_eq!(config.logging.console, LogTarget::Stdout);
        assert_eq!(config.run_logging().console, LogTarget::Stderr);

        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.publisher.transport, TransportKind::InMemory);
        assert_eq!(config.run_logging().console, LogTarget::Stdout);
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.producers.len(), 2);
    }
}
