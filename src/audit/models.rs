//! Audit entry types

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::cases::CaseStatus;
use crate::core_types::{CaseId, UserId};
use crate::db::decode_status;
use crate::error::MarketError;

/// Well-known audit actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Created,
    Engaged,
    Cancelled,
    Closed,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Engaged => "engaged",
            HistoryAction::Cancelled => "cancelled",
            HistoryAction::Closed => "closed",
        }
    }
}

/// One case history row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub case_id: CaseId,
    pub actor_id: UserId,
    pub action: String,
    pub old_status: Option<CaseStatus>,
    pub new_status: Option<CaseStatus>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// New entry stamped now, with a fresh id for idempotent retries
    pub fn new(
        case_id: CaseId,
        actor_id: UserId,
        action: HistoryAction,
        old_status: Option<CaseStatus>,
        new_status: CaseStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            actor_id,
            action: action.as_str().to_string(),
            old_status,
            new_status: Some(new_status),
            reason: reason.into().trim().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Status transition entry (`old -> new`)
    pub fn transition(
        case_id: CaseId,
        actor_id: UserId,
        action: HistoryAction,
        old_status: CaseStatus,
        new_status: CaseStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            case_id,
            actor_id,
            action,
            Some(old_status),
            new_status,
            reason,
        )
    }

    pub(crate) fn from_row(row: &PgRow) -> Result<Self, MarketError> {
        let old_status: Option<String> = row.try_get("old_status")?;
        let new_status: Option<String> = row.try_get("new_status")?;
        Ok(Self {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            actor_id: row.try_get("actor_id")?,
            action: row.try_get("action")?,
            old_status: old_status
                .map(|s| decode_status(&s, "case_histories.old_status", CaseStatus::parse))
                .transpose()?,
            new_status: new_status
                .map(|s| decode_status(&s, "case_histories.new_status", CaseStatus::parse))
                .transpose()?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
