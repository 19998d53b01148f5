//! Checkout: create or reuse the INITIATED payment for a quote.
//!
//! Pure bookkeeping. Nothing here changes case or quote state; that only
//! happens in the settlement engine.

use tracing::{debug, info, warn};

use super::models::{Payment, PaymentStatus};
use super::repository::PaymentRepository;
use crate::cases::{CaseRepository, CaseStatus};
use crate::core_types::{Actor, PaymentId, QuoteId, Role};
use crate::db::Database;
use crate::error::{MarketError, MarketResult};
use crate::quotes::QuoteRepository;

pub struct CheckoutService {
    db: Database,
}

impl CheckoutService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Start paying for a quote.
    ///
    /// Repeated calls for the same quote return the same INITIATED payment.
    ///
    /// # Errors
    /// - `NotFound` if the quote does not exist
    /// - `Forbidden` if the payer does not own the case
    /// - `Conflict` if the case is not OPEN or the quote is already paid
    pub async fn start_settlement(&self, quote_id: QuoteId, payer: &Actor) -> MarketResult<Payment> {
        let mut tx = self.db.pool().begin().await?;

        let quote = QuoteRepository::get(&mut tx, quote_id)
            .await?
            .ok_or_else(|| MarketError::not_found("quote not found"))?;
        let case = CaseRepository::get(&mut tx, quote.case_id)
            .await?
            .ok_or_else(|| MarketError::internal(format!("quote {} has no case", quote.id)))?;

        if payer.role != Role::Client || !case.is_owned_by(payer.id) {
            return Err(MarketError::forbidden("not the case owner"));
        }
        if case.status != CaseStatus::Open {
            return Err(MarketError::conflict("case is not open"));
        }

        let existing = match PaymentRepository::find_live_for_quote(&mut tx, quote.id).await? {
            Some(p) => Some(p),
            None => match PaymentRepository::insert_initiated(&mut tx, &case, &quote).await? {
                Some(created) => {
                    tx.commit().await?;
                    info!(
                        payment_id = %created.id,
                        quote_id = %quote.id,
                        amount_cents = created.amount_cents,
                        "Payment initiated"
                    );
                    return Ok(created);
                }
                // Lost the insert race; the winner's row is committed by now
                None => PaymentRepository::find_live_for_quote(&mut tx, quote.id).await?,
            },
        };

        let payment = existing.ok_or_else(|| {
            MarketError::internal(format!("live payment for quote {} vanished", quote.id))
        })?;

        let payment = match payment.status {
            PaymentStatus::Settled => return Err(MarketError::conflict("quote already paid")),
            PaymentStatus::Failed => {
                return Err(MarketError::internal(format!(
                    "failed payment {} returned as live",
                    payment.id
                )));
            }
            PaymentStatus::Initiated if payment.amount_cents != quote.amount_cents => {
                match PaymentRepository::refresh_amount(&mut tx, payment.id, quote.amount_cents)
                    .await?
                {
                    Some(refreshed) => {
                        info!(
                            payment_id = %refreshed.id,
                            old_amount = payment.amount_cents,
                            new_amount = refreshed.amount_cents,
                            "Payment amount refreshed to current quote"
                        );
                        refreshed
                    }
                    None => {
                        warn!(
                            payment_id = %payment.id,
                            "Reused payment amount differs from quote; provider session already attached"
                        );
                        payment
                    }
                }
            }
            PaymentStatus::Initiated => {
                debug!(payment_id = %payment.id, "Reusing initiated payment");
                payment
            }
        };

        tx.commit().await?;
        Ok(payment)
    }

    /// Record the provider checkout session on an INITIATED payment.
    ///
    /// Idempotent for the same session id; a different one is a conflict.
    pub async fn attach_provider_session(
        &self,
        payment_id: PaymentId,
        session_id: &str,
    ) -> MarketResult<Payment> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(MarketError::conflict("provider session id is empty"));
        }

        let mut conn = self.db.pool().acquire().await?;
        if let Some(payment) = PaymentRepository::attach_session(&mut conn, payment_id, session_id).await? {
            info!(payment_id = %payment_id, session_id = session_id, "Provider session attached");
            return Ok(payment);
        }

        let payment = PaymentRepository::get(&mut conn, payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment not found"))?;
        match payment.provider_session_id.as_deref() {
            Some(existing) if existing == session_id => Ok(payment),
            Some(_) => Err(MarketError::conflict("provider session already attached")),
            None if payment.status.is_terminal() => Err(MarketError::conflict(format!(
                "payment is {}",
                payment.status
            ))),
            None => Err(MarketError::internal(format!(
                "payment {} still attachable after failed update",
                payment_id
            ))),
        }
    }

    /// INITIATED -> FAILED. Frees the quote for a fresh checkout.
    ///
    /// Repeating the call on a FAILED payment is a no-op; a SETTLED payment is a conflict.
    pub async fn mark_failed(&self, payment_id: PaymentId, reason: &str) -> MarketResult<Payment> {
        let mut conn = self.db.pool().acquire().await?;
        if let Some(payment) = PaymentRepository::mark_failed(&mut conn, payment_id, reason.trim()).await? {
            info!(payment_id = %payment_id, reason = reason, "Payment failed");
            return Ok(payment);
        }

        let payment = PaymentRepository::get(&mut conn, payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment not found"))?;
        match payment.status {
            PaymentStatus::Failed => Ok(payment),
            PaymentStatus::Settled => Err(MarketError::conflict("payment already settled")),
            PaymentStatus::Initiated => Err(MarketError::internal(format!(
                "payment {} still initiated after failed update",
                payment_id
            ))),
        }
    }

    /// Payer gives up on a checkout before handing it to the provider.
    ///
    /// Refused once a provider session is attached: the provider may still
    /// capture, and its completion must find the payment INITIATED.
    pub async fn abandon(&self, payment_id: PaymentId, reason: &str) -> MarketResult<Payment> {
        let mut conn = self.db.pool().acquire().await?;
        if let Some(payment) =
            PaymentRepository::abandon_unattached(&mut conn, payment_id, reason.trim()).await?
        {
            info!(payment_id = %payment_id, reason = reason, "Checkout abandoned by payer");
            return Ok(payment);
        }

        let payment = PaymentRepository::get(&mut conn, payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment not found"))?;
        match payment.status {
            PaymentStatus::Failed => Ok(payment),
            PaymentStatus::Settled => Err(MarketError::conflict("payment already settled")),
            PaymentStatus::Initiated => {
                debug!(payment_id = %payment_id, "Abandon refused: provider session attached");
                Err(MarketError::conflict(
                    "provider session attached; awaiting provider outcome",
                ))
            }
        }
    }

    pub async fn get(&self, payment_id: PaymentId) -> MarketResult<Payment> {
        let mut conn = self.db.pool().acquire().await?;
        PaymentRepository::get(&mut conn, payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment not found"))
    }
}
