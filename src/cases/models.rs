//! Case models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::fmt;

use crate::core_types::{CaseId, QuoteId, UserId};
use crate::db::decode_status;
use crate::error::MarketError;

/// Case lifecycle states
///
/// Stored as VARCHAR. Terminal states: CLOSED, CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    /// Accepting quotes
    Open,
    /// Winner selected and paid
    Engaged,
    /// Terminal: engagement finished
    Closed,
    /// Terminal: withdrawn by the client while open
    Cancelled,
}

impl CaseStatus {
    /// States in which `accepted_quote_id` must be present
    #[inline]
    pub fn has_winner(&self) -> bool {
        matches!(self, CaseStatus::Engaged | CaseStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Engaged => "engaged",
            CaseStatus::Closed => "closed",
            CaseStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(CaseStatus::Open),
            "engaged" => Some(CaseStatus::Engaged),
            "closed" => Some(CaseStatus::Closed),
            "cancelled" => Some(CaseStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A legal case posted by a client
#[derive(Debug, Clone, Serialize)]
pub struct Case {
    pub id: CaseId,
    pub client_id: UserId,
    pub title: String,
    pub category: String,
    pub description: String,
    pub status: CaseStatus,
    pub accepted_quote_id: Option<QuoteId>,
    pub accepted_lawyer_id: Option<UserId>,
    pub engaged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Case {
    pub(crate) const COLUMNS: &'static str = "id, client_id, title, category, description, status, \
         accepted_quote_id, accepted_lawyer_id, engaged_at, created_at";

    pub(crate) fn from_row(row: &PgRow) -> Result<Self, MarketError> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            title: row.try_get("title")?,
            category: row.try_get("category")?,
            description: row.try_get("description")?,
            status: decode_status(&status, "cases.status", CaseStatus::parse)?,
            accepted_quote_id: row.try_get("accepted_quote_id")?,
            accepted_lawyer_id: row.try_get("accepted_lawyer_id")?,
            engaged_at: row.try_get("engaged_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.client_id == user_id
    }
}

/// Input for creating a case
#[derive(Debug, Clone)]
pub struct NewCase {
    pub title: String,
    pub category: String,
    pub description: String,
}
