//! Settlement Transaction Engine
//!
//! One database transaction per attempt:
//!
//! 1. lock payment row (SETTLED -> return, nothing to do)
//! 2. lock case row
//! 3. load quote, verify amount
//! 4. if case is OPEN: accept quote, reject siblings, engage case
//! 5. mark payment SETTLED
//! 6. audit the engagement (savepoint; a failure does not abort)
//! 7. commit, then hand any failed audit entry to the retry queue
//!
//! Lock order is always payment then case. Offer submission and case
//! cancel/close take only the case lock, so no cycle is possible.
//!
//! Any error drops the transaction, which rolls everything back.

use tracing::{debug, error, info, warn};

use super::models::{PaymentStatus, SettlementOutcome, SettlementTrigger};
use super::repository::PaymentRepository;
use crate::audit::{AuditTrail, HistoryAction, HistoryEntry};
use crate::cases::{CaseRepository, CaseStatus};
use crate::core_types::PaymentId;
use crate::db::Database;
use crate::error::{MarketError, MarketResult};
use crate::quotes::QuoteRepository;

pub struct SettlementEngine {
    db: Database,
    audit: AuditTrail,
}

impl SettlementEngine {
    pub fn new(db: Database, audit: AuditTrail) -> Self {
        Self { db, audit }
    }

    /// Settle via the direct (mock) path
    pub async fn settle_direct(&self, payment_id: PaymentId) -> MarketResult<SettlementOutcome> {
        self.attempt(&SettlementTrigger::direct(payment_id)).await
    }

    /// Finalize a payment. Safe under any number of concurrent or repeated calls.
    ///
    /// # Errors
    /// - `NotFound` if the payment does not exist
    /// - `Conflict` on amount mismatch, or when the payment already FAILED
    /// - `Internal` on storage failure (fully rolled back)
    pub async fn attempt(&self, trigger: &SettlementTrigger) -> MarketResult<SettlementOutcome> {
        let payment_id = trigger.payment_id;
        let mut tx = self.db.pool().begin().await?;

        let payment = PaymentRepository::lock(&mut tx, payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found("payment not found"))?;

        match payment.status {
            PaymentStatus::Settled => {
                debug!(payment_id = %payment_id, "Payment already settled");
                return Ok(SettlementOutcome {
                    payment_id,
                    case_id: payment.case_id,
                    quote_id: payment.quote_id,
                    already_settled: true,
                    engaged: false,
                    needs_reconciliation: false,
                });
            }
            PaymentStatus::Failed => {
                warn!(payment_id = %payment_id, "Completion received for failed payment");
                return Err(MarketError::conflict("payment has failed"));
            }
            PaymentStatus::Initiated => {}
        }

        if let Some(confirmed) = trigger
            .confirmed_amount
            .filter(|amount| *amount != payment.amount_cents)
        {
            warn!(
                payment_id = %payment_id,
                expected = payment.amount_cents,
                confirmed = confirmed,
                "Provider amount mismatch"
            );
            return Err(MarketError::conflict("amount mismatch"));
        }

        let case = CaseRepository::lock(&mut tx, payment.case_id)
            .await?
            .ok_or_else(|| {
                MarketError::internal(format!("payment {} references missing case", payment_id))
            })?;

        let quote = QuoteRepository::get(&mut tx, payment.quote_id)
            .await?
            .ok_or_else(|| {
                MarketError::internal(format!("payment {} references missing quote", payment_id))
            })?;

        if quote.amount_cents != payment.amount_cents {
            warn!(
                payment_id = %payment_id,
                quote_id = %quote.id,
                payment_amount = payment.amount_cents,
                quote_amount = quote.amount_cents,
                "Quote changed after checkout; settlement aborted"
            );
            return Err(MarketError::conflict("amount mismatch"));
        }

        let mut engaged = false;
        let mut needs_reconciliation = false;

        if case.status == CaseStatus::Open {
            if !QuoteRepository::accept(&mut tx, quote.id).await? {
                return Err(MarketError::internal(format!(
                    "quote {} is {} on an open case",
                    quote.id, quote.status
                )));
            }
            let rejected = QuoteRepository::reject_siblings(&mut tx, case.id, quote.id).await?;
            if !CaseRepository::engage(&mut tx, case.id, quote.id, quote.lawyer_id).await? {
                return Err(MarketError::internal(format!(
                    "case {} changed status under lock",
                    case.id
                )));
            }
            engaged = true;
            debug!(case_id = %case.id, rejected = rejected, "Sibling quotes rejected");
        } else if !(case.status.has_winner() && case.accepted_quote_id == Some(quote.id)) {
            // Money was captured for a quote that did not win
            needs_reconciliation = true;
            error!(
                payment_id = %payment_id,
                case_id = %case.id,
                case_status = %case.status,
                quote_id = %quote.id,
                "Settling payment for a non-winning quote; needs reconciliation"
            );
        }

        if !PaymentRepository::mark_settled(&mut tx, payment_id, trigger.provider_payment_id.as_deref())
            .await?
        {
            return Err(MarketError::internal(format!(
                "payment {} changed status under lock",
                payment_id
            )));
        }

        let deferred = if engaged {
            self.audit
                .record(
                    &mut tx,
                    HistoryEntry::transition(
                        case.id,
                        case.client_id,
                        HistoryAction::Engaged,
                        CaseStatus::Open,
                        CaseStatus::Engaged,
                        trigger.audit_reason(),
                    ),
                )
                .await
        } else {
            None
        };

        tx.commit().await?;
        self.audit.defer(deferred);

        info!(
            payment_id = %payment_id,
            case_id = %case.id,
            quote_id = %quote.id,
            engaged = engaged,
            "Payment settled"
        );

        Ok(SettlementOutcome {
            payment_id,
            case_id: case.id,
            quote_id: quote.id,
            already_settled: false,
            engaged,
            needs_reconciliation,
        })
    }
}
