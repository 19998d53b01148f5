//! Audit Retry Worker
//!
//! Background task that re-inserts audit entries whose in-transaction
//! insert failed. Runs until every [`super::AuditTrail`] sender is dropped.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::models::HistoryEntry;
use super::writer;
use crate::config::AuditConfig;

/// Configuration for the retry worker
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay between attempts for one entry
    pub retry_interval: Duration,
    /// Attempts per entry before it is dropped (logged at error)
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

impl From<&AuditConfig> for RetryConfig {
    fn from(config: &AuditConfig) -> Self {
        Self {
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

pub struct AuditRetryWorker {
    pool: PgPool,
    rx: mpsc::Receiver<HistoryEntry>,
    config: RetryConfig,
}

impl AuditRetryWorker {
    pub fn new(pool: PgPool, rx: mpsc::Receiver<HistoryEntry>, config: RetryConfig) -> Self {
        Self { pool, rx, config }
    }

    /// Run until the queue is closed. Returns how many entries were persisted.
    pub async fn run(mut self) -> usize {
        info!(
            retry_interval_ms = self.config.retry_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Starting audit retry worker"
        );

        let mut persisted = 0;
        while let Some(entry) = self.rx.recv().await {
            if self.persist_with_retry(&entry).await {
                persisted += 1;
            }
        }

        info!(persisted, "Audit retry worker stopped");
        persisted
    }

    async fn persist_with_retry(&self, entry: &HistoryEntry) -> bool {
        for attempt in 1..=self.config.max_attempts {
            let result = match self.pool.acquire().await {
                Ok(mut conn) => writer::insert(&mut conn, entry).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!(
                        case_id = %entry.case_id,
                        action = %entry.action,
                        attempt,
                        "Deferred audit entry persisted"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        case_id = %entry.case_id,
                        action = %entry.action,
                        attempt,
                        error = %e,
                        "Deferred audit insert failed"
                    );
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_interval).await;
                    }
                }
            }
        }

        error!(
            entry_id = %entry.id,
            case_id = %entry.case_id,
            action = %entry.action,
            old_status = ?entry.old_status,
            new_status = ?entry.new_status,
            "CRITICAL: audit entry dropped after retries"
        );
        false
    }
}
