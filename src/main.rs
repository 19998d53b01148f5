//! case_market server
//!
//! ```text
//! cargo run -- --env dev [--port 8080]
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use case_market::audit::{AuditRetryWorker, AuditTrail, RetryConfig};
use case_market::config::AppConfig;
use case_market::db::Database;
use case_market::gateway::{self, state::AppState};
use case_market::logging::init_logging;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = init_logging(&config)?;

    tracing::info!(
        env = %env,
        version = env!("GIT_HASH"),
        "Starting case_market"
    );

    let url = config
        .postgres_url
        .as_deref()
        .context("postgres_url not configured (set DATABASE_URL)")?;
    if config.auth.jwt_secret.is_empty() {
        anyhow::bail!("auth.jwt_secret not configured (set JWT_SECRET)");
    }

    let db = Database::connect(url, &config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.migrate().await.context("Failed to apply schema")?;
    tracing::info!("PostgreSQL connected, schema ready");

    let (retry_tx, retry_rx) = mpsc::channel(config.audit.queue_size.max(1));
    let worker = AuditRetryWorker::new(
        db.pool().clone(),
        retry_rx,
        RetryConfig::from(&config.audit),
    );
    let worker_handle = tokio::spawn(worker.run());

    let state = Arc::new(AppState::new(
        db.clone(),
        AuditTrail::new(retry_tx),
        &config,
    ));
    gateway::run_server(&config.gateway, state).await?;

    // Router (and every AuditTrail clone) is gone; the worker drains and exits
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Audit retry worker panicked");
    }
    db.pool().close().await;
    Ok(())
}
