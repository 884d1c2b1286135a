//! Solo RPC Miner - Main Application
//!
//! Connects to a full node, keeps a block candidate current and logs the
//! job stream the mining backends consume.

use anyhow::Context;
use solo_rpc_miner::{
    config::Config,
    http::HttpTransport,
    metrics::TracingMetrics,
    runtime::{self, ClientEvent, Miner},
    utils::{format_amount, format_duration},
    ShareStatus, APP_NAME, APP_VERSION,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _guard = init_tracing(&config)?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: node={}, coin={}, poll={}ms, job timeout={}ms",
        config.endpoint(),
        config.coin,
        config.poll_interval,
        config.job_timeout
    );

    let transport = Arc::new(
        HttpTransport::new(config.http_timeout_duration(), config.insecure)
            .context("failed to create HTTP client")?,
    );
    let miner = runtime::run(config.client_config()?, transport, Arc::new(TracingMetrics))?;

    if let Some(nblocks) = config.generate {
        let id = miner.handle.generate(nblocks).await?;
        info!("Requested {} blocks (request {})", nblocks, id);
    }

    supervise(miner).await
}

/// Log client events until Ctrl-C, then shut down
async fn supervise(mut miner: Miner) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = miner.events.recv() => match event {
                Some(event) => log_event(&event),
                None => {
                    error!("Client stopped unexpectedly");
                    break;
                }
            },
        }
    }

    miner.handle.shutdown();
    miner.task.await.context("event loop panicked")?;
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Job(job) => info!(
            "Job {} height {} algo {} target {}{} reward {}",
            job.id,
            job.height(),
            job.algorithm,
            job.partial_target(),
            if job.is_dev_round() { " (dev round)" } else { "" },
            format_amount(job.candidate().reward.value)
        ),
        ClientEvent::Result { result, status } => match status {
            ShareStatus::Accepted => info!(
                "Block {} accepted from backend {} in {}",
                result.seq,
                result.backend,
                format_duration(result.elapsed)
            ),
            ShareStatus::Partial => info!(
                "Partial share from backend {} (diff {})",
                result.backend, result.actual_diff
            ),
            ShareStatus::Rejected(reason) => warn!(
                "Block {} rejected after {}: {}",
                result.seq,
                format_duration(result.elapsed),
                reason
            ),
        },
        ClientEvent::LoginSuccess => info!("Connected to node"),
        ClientEvent::Closed { failures } => {
            warn!("Connection lost ({} consecutive failures)", failures)
        }
    }
}

/// Console logging, plus a log file when configured
fn init_tracing(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let (console_json, console_text) = if config.log_json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().with_target(false)))
    };

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("invalid log file {}", path.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Print current configuration
fn print_configuration(config: &Config) -> anyhow::Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
