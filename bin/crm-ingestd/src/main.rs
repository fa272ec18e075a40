//! ---
//! ingest_section: "01-core-functionality"
//! ingest_subsection: "binary"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Binary entrypoint for the ingestion daemon."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use crm_ingest_common::{init_console, init_tracing, AppConfig, LogFormat, TransportKind, VersionInfo};
use crm_ingest_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use crm_ingest_producer::{producers_from_config, ProducerRegistry};
use crm_ingest_publisher::{InMemoryQueue, Publisher, PublisherMetrics, QueueTransport, StdoutQueue};
use crm_ingest_scheduler::{Scheduler, SchedulerMetrics};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("crm-ingestd ", env!("CARGO_PKG_VERSION")),
    about = "CRM ingestion daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FORMAT",
        help = "Override the stdout log format (structured-json or pretty)"
    )]
    log_format: Option<LogFormat>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Schedule every configured producer until ctrl-c")]
    Run,
    #[command(about = "Validate the configuration and list the discovered producers")]
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ingest.toml"));
    candidates.push(PathBuf::from("configs/ingest.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let metrics_registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(&version.semver, &version.profile);

            init_tracing("crm-ingestd", &config.run_logging())?;
            info!(
                config = %loaded.source.display(),
                producers = config.producers.len(),
                version = %version.cli_string(),
                "configuration loaded"
            );
            run_daemon(config, metrics_registry).await?
        }
        Commands::Check => {
            init_console();
            render_producers(&config);
            let discovered = producers_from_config(&config)?;
            let mut builder = ProducerRegistry::builder();
            builder.register_all(discovered)?;
            let registry = builder.build();
            println!(
                "configuration {} is valid: {} producer(s)",
                loaded.source.display(),
                registry.len()
            );
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let metrics_enabled = config.metrics.enabled;

    let transport: Arc<dyn QueueTransport> = match config.publisher.transport {
        TransportKind::Stdout => Arc::new(StdoutQueue::new()),
        TransportKind::InMemory => {
            warn!("in-memory transport selected; envelopes are not delivered anywhere");
            Arc::new(InMemoryQueue::new())
        }
    };
    let mut publisher = Publisher::from_config(&config.publisher, transport);
    for (source, producer) in &config.producers {
        if let Some(topic) = &producer.topic {
            publisher = publisher.with_topic(source.clone(), topic.clone());
        }
    }
    if metrics_enabled {
        publisher = publisher.with_metrics(
            PublisherMetrics::new(metrics_registry.clone())
                .context("failed to register publisher metrics")?,
        );
    }
    let publisher = Arc::new(publisher);

    let mut builder = ProducerRegistry::builder();
    builder.register_all(producers_from_config(&config)?)?;
    let registry = builder.build();
    info!(producers = ?registry.names(), "producers discovered");

    let scheduler_metrics = if metrics_enabled {
        Some(
            SchedulerMetrics::new(metrics_registry.clone())
                .context("failed to register scheduler metrics")?,
        )
    } else {
        None
    };
    let scheduler = Scheduler::from_config(registry, publisher, &config, scheduler_metrics)?;
    let handle = scheduler.start();

    let server = if metrics_enabled {
        let server = spawn_http_server(
            metrics_registry,
            config.metrics.listen,
            status::router(handle.view()),
        )?;
        info!(address = %server.addr(), "metrics and status endpoints enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    handle.shutdown().await;

    if let Some(server) = server {
        server.shutdown().await?;
    }
    Ok(())
}

fn render_producers(config: &AppConfig) {
    for (source, producer) in &config.producers {
        let topic = producer
            .topic
            .as_deref()
            .unwrap_or(&config.publisher.default_topic);
        println!(
            "{:<24} every {:>6}s  timeout {:>4}s  topic {:<24} {}",
            source,
            producer.cadence.as_secs(),
            config.run_timeout_for(source).as_secs(),
            topic,
            producer.url
        );
    }
}
