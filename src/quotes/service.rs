//! Offer Lifecycle Manager
//!
//! `submit_or_update` re-validates the case status under the case row lock.
//! A lock-free pre-check is not enough: a settlement may engage the case
//! between the check and the write. Settlement takes the same lock, so the
//! two serialize and the loser observes the other's result.

use tracing::{debug, error, info, warn};

use super::models::{Quote, QuoteSubmission};
use super::repository::QuoteRepository;
use crate::cases::{CaseRepository, CaseStatus};
use crate::core_types::{Actor, QuoteId, Role};
use crate::db::Database;
use crate::error::{MarketError, MarketResult};

pub struct QuoteService {
    db: Database,
}

impl QuoteService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the lawyer's quote for a case, or overwrite it while PROPOSED.
    ///
    /// # Errors
    /// - `Forbidden` if the actor is not a lawyer
    /// - `NotFound` if the case does not exist
    /// - `Conflict` if the case is not OPEN, or the quote is already ACCEPTED/REJECTED
    pub async fn submit_or_update(
        &self,
        actor: &Actor,
        input: QuoteSubmission,
    ) -> MarketResult<Quote> {
        if actor.role != Role::Lawyer {
            return Err(MarketError::forbidden("only lawyers can submit quotes"));
        }
        let lawyer_id = actor.id;

        let mut tx = self.db.pool().begin().await?;

        let case = CaseRepository::lock(&mut tx, input.case_id)
            .await?
            .ok_or_else(|| MarketError::not_found("case not found"))?;
        if case.status != CaseStatus::Open {
            debug!(case_id = %case.id, status = %case.status, "Quote rejected: case not open");
            return Err(MarketError::conflict("case is not open"));
        }

        let quote = match QuoteRepository::find_for_lawyer(&mut tx, case.id, lawyer_id).await? {
            None => {
                let quote = QuoteRepository::insert(&mut tx, lawyer_id, &input).await?;
                info!(
                    case_id = %case.id,
                    quote_id = %quote.id,
                    lawyer_id = %lawyer_id,
                    amount_cents = quote.amount_cents,
                    "Quote submitted"
                );
                quote
            }
            Some(existing) => {
                if existing.status.is_terminal() {
                    warn!(
                        quote_id = %existing.id,
                        status = %existing.status,
                        "Quote update rejected: immutable"
                    );
                    return Err(MarketError::conflict(
                        "quote is immutable (already accepted/rejected)",
                    ));
                }
                if existing.lawyer_id != lawyer_id {
                    // The lookup is keyed by lawyer, so this means corrupted data
                    error!(
                        quote_id = %existing.id,
                        owner = %existing.lawyer_id,
                        caller = %lawyer_id,
                        "Quote ownership invariant violated"
                    );
                    return Err(MarketError::internal("quote ownership mismatch"));
                }
                let quote = QuoteRepository::update_terms(&mut tx, existing.id, &input)
                    .await?
                    .ok_or_else(|| {
                        MarketError::internal(format!("quote {} changed status under lock", existing.id))
                    })?;
                info!(
                    case_id = %case.id,
                    quote_id = %quote.id,
                    amount_cents = quote.amount_cents,
                    "Quote updated"
                );
                quote
            }
        };

        tx.commit().await?;
        Ok(quote)
    }

    /// Quote by id (no authorization; callers scope access)
    pub async fn get(&self, quote_id: QuoteId) -> MarketResult<Quote> {
        let mut conn = self.db.pool().acquire().await?;
        QuoteRepository::get(&mut conn, quote_id)
            .await?
            .ok_or_else(|| MarketError::not_found("quote not found"))
    }
}
