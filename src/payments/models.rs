//! Payment (settlement record) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::fmt;

use crate::core_types::{AmountCents, CaseId, PaymentId, QuoteId, UserId};
use crate::db::decode_status;
use crate::error::MarketError;

/// Payment lifecycle states
///
/// ```text
/// INITIATED ──▶ SETTLED (exactly once, by the engine)
///     │
///     └──────▶ FAILED  (frees the quote for a new attempt)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Initiated,
    Settled,
    Failed,
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Initiated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(PaymentStatus::Initiated),
            "settled" => Some(PaymentStatus::Settled),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment attempt for one quote
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub case_id: CaseId,
    pub quote_id: QuoteId,
    /// Payer (the case owner)
    pub client_id: UserId,
    /// Provider checkout session id, immutable once set
    pub provider_session_id: Option<String>,
    /// Provider payment id, recorded at settlement
    pub provider_payment_id: Option<String>,
    pub amount_cents: AmountCents,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub(crate) const COLUMNS: &'static str = "id, case_id, quote_id, client_id, provider_session_id, \
         provider_payment_id, amount_cents, status, failure_reason, created_at, updated_at";

    pub(crate) fn from_row(row: &PgRow) -> Result<Self, MarketError> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            quote_id: row.try_get("quote_id")?,
            client_id: row.try_get("client_id")?,
            provider_session_id: row.try_get("provider_session_id")?,
            provider_payment_id: row.try_get("provider_payment_id")?,
            amount_cents: row.try_get("amount_cents")?,
            status: decode_status(&status, "payments.status", PaymentStatus::parse)?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Which completion path fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Synchronous "complete" call (dev/mock provider)
    Direct,
    /// Verified provider callback
    Provider,
}

/// Input to [`super::SettlementEngine::attempt`], already resolved to a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementTrigger {
    pub payment_id: PaymentId,
    pub source: TriggerSource,
    /// Provider payment id carried by the callback, persisted if the record has none
    pub provider_payment_id: Option<String>,
    /// Amount the provider says it captured
    pub confirmed_amount: Option<AmountCents>,
    /// Provider receipt number, for the audit reason only
    pub receipt: Option<String>,
}

impl SettlementTrigger {
    pub fn direct(payment_id: PaymentId) -> Self {
        Self {
            payment_id,
            source: TriggerSource::Direct,
            provider_payment_id: None,
            confirmed_amount: None,
            receipt: None,
        }
    }

    /// Reason text written to the case history
    pub fn audit_reason(&self) -> String {
        match (self.source, self.receipt.as_deref()) {
            (TriggerSource::Direct, _) => "payment completed (mock)".to_string(),
            (TriggerSource::Provider, Some(receipt)) if !receipt.is_empty() => {
                format!("payment completed (provider: {})", receipt)
            }
            (TriggerSource::Provider, _) => "payment completed (provider)".to_string(),
        }
    }
}

/// Result of one settlement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    pub payment_id: PaymentId,
    pub case_id: CaseId,
    pub quote_id: QuoteId,
    /// The payment was already SETTLED; nothing was changed
    pub already_settled: bool,
    /// This call moved the case OPEN -> ENGAGED
    pub engaged: bool,
    /// Payment settled but another quote already won the case; refund belongs to reconciliation
    pub needs_reconciliation: bool,
}
