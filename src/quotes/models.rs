//! Quote models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::fmt;

use crate::core_types::{AmountCents, CaseId, QuoteId, UserId};
use crate::db::decode_status;
use crate::error::MarketError;

/// Quote lifecycle states. Terminal: ACCEPTED, REJECTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Proposed,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QuoteStatus::Proposed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Proposed => "proposed",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(QuoteStatus::Proposed),
            "accepted" => Some(QuoteStatus::Accepted),
            "rejected" => Some(QuoteStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lawyer's proposal for a case
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub id: QuoteId,
    pub case_id: CaseId,
    pub lawyer_id: UserId,
    pub amount_cents: AmountCents,
    /// Proposed duration in days
    pub days: i32,
    pub note: String,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub(crate) const COLUMNS: &'static str =
        "id, case_id, lawyer_id, amount_cents, days, note, status, created_at, updated_at";

    pub(crate) fn from_row(row: &PgRow) -> Result<Self, MarketError> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            lawyer_id: row.try_get("lawyer_id")?,
            amount_cents: row.try_get("amount_cents")?,
            days: row.try_get("days")?,
            note: row.try_get("note")?,
            status: decode_status(&status, "quotes.status", QuoteStatus::parse)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Values a lawyer submits (create or overwrite)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSubmission {
    pub case_id: CaseId,
    pub amount_cents: AmountCents,
    pub days: i32,
    pub note: String,
}

impl QuoteSubmission {
    pub fn new(case_id: CaseId, amount_cents: AmountCents, days: i32, note: impl Into<String>) -> Self {
        Self {
            case_id,
            amount_cents,
            days,
            note: note.into().trim().to_string(),
        }
    }
}
