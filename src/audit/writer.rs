//! Audit writer: savepoint insert inside the caller's transaction,
//! post-commit hand-off to the retry queue.

use sqlx::{Connection, PgConnection, PgPool};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::models::HistoryEntry;
use crate::core_types::CaseId;
use crate::error::MarketError;

/// Handle used by services to append audit entries
#[derive(Clone, Default)]
pub struct AuditTrail {
    retry_tx: Option<mpsc::Sender<HistoryEntry>>,
}

impl AuditTrail {
    /// Audit trail backed by a retry queue (see [`super::AuditRetryWorker`])
    pub fn new(retry_tx: mpsc::Sender<HistoryEntry>) -> Self {
        Self {
            retry_tx: Some(retry_tx),
        }
    }

    /// Audit trail without a retry queue: failed entries are logged and dropped
    pub fn without_retry() -> Self {
        Self { retry_tx: None }
    }

    /// Append an entry inside an open transaction.
    ///
    /// Returns the entry back when the insert failed; the caller passes it to
    /// [`AuditTrail::defer`] once its own transaction has committed.
    #[must_use = "a failed entry must be deferred after commit"]
    pub async fn record(
        &self,
        conn: &mut PgConnection,
        entry: HistoryEntry,
    ) -> Option<HistoryEntry> {
        match insert_in_savepoint(conn, &entry).await {
            Ok(()) => {
                debug!(case_id = %entry.case_id, action = %entry.action, "Audit entry written");
                None
            }
            Err(e) => {
                warn!(
                    case_id = %entry.case_id,
                    action = %entry.action,
                    error = %e,
                    "Audit insert failed inside transaction, deferring"
                );
                Some(entry)
            }
        }
    }

    /// Hand entries that failed in-transaction to the retry queue
    pub fn defer(&self, entries: impl IntoIterator<Item = HistoryEntry>) {
        for entry in entries {
            let Some(tx) = &self.retry_tx else {
                error!(
                    case_id = %entry.case_id,
                    action = %entry.action,
                    "Audit entry lost: no retry queue configured"
                );
                continue;
            };
            if let Err(e) = tx.try_send(entry) {
                let entry = e.into_inner();
                error!(
                    case_id = %entry.case_id,
                    action = %entry.action,
                    "Audit entry lost: retry queue full or closed"
                );
            }
        }
    }
}

async fn insert_in_savepoint(
    conn: &mut PgConnection,
    entry: &HistoryEntry,
) -> Result<(), sqlx::Error> {
    let mut savepoint = conn.begin().await?;
    match insert(&mut *savepoint, entry).await {
        Ok(()) => savepoint.commit().await,
        Err(e) => {
            // Restores the outer transaction to a usable state
            savepoint.rollback().await?;
            Err(e)
        }
    }
}

/// Insert one entry; re-inserting the same id is a no-op
pub async fn insert(conn: &mut PgConnection, entry: &HistoryEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO case_histories
            (id, case_id, actor_id, action, old_status, new_status, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(entry.id)
    .bind(entry.case_id)
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(entry.old_status.map(|s| s.as_str()))
    .bind(entry.new_status.map(|s| s.as_str()))
    .bind(&entry.reason)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// All history rows for a case, oldest first
pub async fn list_for_case(
    pool: &PgPool,
    case_id: CaseId,
) -> Result<Vec<HistoryEntry>, MarketError> {
    let rows = sqlx::query(
        r#"
        SELECT id, case_id, actor_id, action, old_status, new_status, reason, created_at
        FROM case_histories
        WHERE case_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(HistoryEntry::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::HistoryAction;
    use crate::cases::CaseStatus;
    use uuid::Uuid;

    fn entry() -> HistoryEntry {
        HistoryEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            HistoryAction::Created,
            None,
            CaseStatus::Open,
            "case created",
        )
    }

    #[tokio::test]
    async fn test_defer_enqueues_entries() {
        let (tx, mut rx) = mpsc::channel(4);
        let trail = AuditTrail::new(tx);
        let e = entry();
        trail.defer(vec![e.clone()]);
        assert_eq!(rx.recv().await, Some(e));
    }

    #[tokio::test]
    async fn test_defer_full_queue_drops_without_panic() {
        let (tx, mut rx) = mpsc::channel(1);
        let trail = AuditTrail::new(tx);
        trail.defer(vec![entry(), entry(), entry()]);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_defer_without_queue_is_noop() {
        AuditTrail::without_retry().defer(vec![entry()]);
    }
}
