//! Provider callback handling.
//!
//! Signature verification happens before anything here sees the event.
//! This module only maps a verified event onto a payment and routes it to
//! the settlement engine (completed) or the failure path (failed/expired).

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::sync::Arc;
use tracing::{info, warn};

use super::checkout::CheckoutService;
use super::models::{Payment, SettlementOutcome, SettlementTrigger, TriggerSource};
use super::repository::PaymentRepository;
use super::settlement::SettlementEngine;
use crate::core_types::{AmountCents, PaymentId};
use crate::db::Database;
use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderEventKind {
    Completed,
    Failed,
    Expired,
}

/// A verified provider notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub kind: ProviderEventKind,
    /// Provider checkout session id
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Our payment id as echoed back by the provider
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Provider-side payment id
    #[serde(default)]
    pub payment_ref: Option<String>,
    #[serde(default)]
    pub amount_cents: Option<AmountCents>,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl ProviderEvent {
    pub fn trigger(&self, payment_id: PaymentId) -> SettlementTrigger {
        SettlementTrigger {
            payment_id,
            source: TriggerSource::Provider,
            provider_payment_id: non_empty(self.payment_ref.as_deref()).map(str::to_string),
            confirmed_amount: self.amount_cents,
            receipt: non_empty(self.receipt.as_deref()).map(str::to_string),
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

pub struct CallbackResolver;

impl CallbackResolver {
    /// Session id first, then the echoed reference id
    pub async fn resolve(conn: &mut PgConnection, event: &ProviderEvent) -> MarketResult<PaymentId> {
        if let Some(session_id) = non_empty(event.correlation_id.as_deref()) {
            if let Some(payment) = PaymentRepository::find_by_session(conn, session_id).await? {
                return Ok(payment.id);
            }
        }
        Self::parse_reference(event.reference_id.as_deref())
    }

    pub fn parse_reference(reference_id: Option<&str>) -> MarketResult<PaymentId> {
        let raw = non_empty(reference_id)
            .ok_or_else(|| MarketError::not_found("payment reference missing"))?;
        raw.parse()
            .map_err(|_| MarketError::not_found("payment reference is not a payment id"))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "lowercase")]
pub enum CallbackOutcome {
    Settled(SettlementOutcome),
    Failed(Payment),
}

/// Routes verified provider events
pub struct CallbackProcessor {
    db: Database,
    engine: Arc<SettlementEngine>,
    checkout: Arc<CheckoutService>,
}

impl CallbackProcessor {
    pub fn new(db: Database, engine: Arc<SettlementEngine>, checkout: Arc<CheckoutService>) -> Self {
        Self {
            db,
            engine,
            checkout,
        }
    }

    pub async fn process(&self, event: &ProviderEvent) -> MarketResult<CallbackOutcome> {
        let payment_id = {
            let mut conn = self.db.pool().acquire().await?;
            CallbackResolver::resolve(&mut conn, event).await?
        };

        match event.kind {
            ProviderEventKind::Completed => {
                let outcome = self.engine.attempt(&event.trigger(payment_id)).await?;
                info!(
                    payment_id = %payment_id,
                    already_settled = outcome.already_settled,
                    "Provider completion processed"
                );
                Ok(CallbackOutcome::Settled(outcome))
            }
            ProviderEventKind::Failed | ProviderEventKind::Expired => {
                let reason = non_empty(event.failure_reason.as_deref()).unwrap_or(match event.kind {
                    ProviderEventKind::Expired => "checkout expired",
                    _ => "payment failed at provider",
                });
                warn!(payment_id = %payment_id, reason = reason, "Provider reported failure");
                let payment = self.checkout.mark_failed(payment_id, reason).await?;
                Ok(CallbackOutcome::Failed(payment))
            }
        }
    }
}
