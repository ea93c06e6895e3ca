//! VM Analyzer - cost and efficiency analysis runner
//!
//! Loads one connection's inventory/metric snapshot, runs the requested
//! analyses and emits typed results (stdout) plus normalized findings.

use analysis_lib::{
    persist_findings, AnalysisContext, AnalysisEngine, AnalysisMode, AnalysisRequest, MemoryStore,
};
use anyhow::{Context, Result};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod sink;

const ANALYZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(version = ANALYZER_VERSION, "Starting vm-analyzer");

    let config = config::AgentConfig::load()?;
    let mode = AnalysisMode::parse(&config.mode);
    if !AnalysisMode::is_valid(&config.mode) {
        warn!(requested = %config.mode, resolved = %mode, "Unknown analysis mode");
    }
    info!(
        snapshot = %config.snapshot_path.display(),
        connection_id = config.connection_id,
        mode = %mode,
        "Analyzer configured"
    );

    let store = Arc::new(MemoryStore::load_json(&config.snapshot_path)?);

    // Ctrl-C stops the run between VMs
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let ctx = AnalysisContext::default()
        .with_timezone(config.timezone()?)
        .with_cancellation(cancel_rx);

    let mut request =
        AnalysisRequest::new(config.connection_id, config.kinds()?).with_mode(&config.mode);
    if let Some(custom) = config.load_custom()? {
        request = request.with_custom(custom);
    }
    if let Some(task_id) = config.task_id {
        request = request.with_task(task_id);
    }

    let engine = AnalysisEngine::new(store.clone(), store.clone());
    let outcome = engine.run(&ctx, &request).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(path) = &config.findings_output {
        let findings = outcome.findings(config.task_id.unwrap_or_default(), Utc::now())?;
        let written = persist_findings(&sink::JsonLinesSink::new(path), &findings).await?;
        info!(count = written, path = %path.display(), "Findings written");
    }

    if let Some(path) = &config.metrics_output {
        write_metrics(path)?;
    }

    info!("Analysis finished");
    Ok(())
}

/// Dump the process registry in Prometheus text format
fn write_metrics(path: &Path) -> Result<()> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    std::fs::write(path, buffer)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}
