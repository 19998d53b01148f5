//! Payment persistence

use sqlx::PgConnection;

use super::models::{Payment, PaymentStatus};
use crate::cases::Case;
use crate::core_types::{AmountCents, PaymentId, QuoteId};
use crate::error::MarketError;
use crate::quotes::Quote;

pub struct PaymentRepository;

impl PaymentRepository {
    pub async fn get(
        conn: &mut PgConnection,
        payment_id: PaymentId,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", Payment::COLUMNS);
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// Read and take the row lock. The settlement engine's first step.
    pub async fn lock(
        conn: &mut PgConnection,
        payment_id: PaymentId,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// The INITIATED or SETTLED payment for a quote, if any
    pub async fn find_live_for_quote(
        conn: &mut PgConnection,
        quote_id: QuoteId,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE quote_id = $1 AND status <> $2",
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(quote_id)
            .bind(PaymentStatus::Failed.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    pub async fn find_by_session(
        conn: &mut PgConnection,
        session_id: &str,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE provider_session_id = $1",
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// Insert an INITIATED payment for the quote's current amount.
    ///
    /// Returns None when another live payment for the quote already exists
    /// (`ux_payments_quote_live`); the caller re-reads the winner.
    pub async fn insert_initiated(
        conn: &mut PgConnection,
        case: &Case,
        quote: &Quote,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            r#"
            INSERT INTO payments (case_id, quote_id, client_id, amount_cents, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (quote_id) WHERE status <> 'failed' DO NOTHING
            RETURNING {}
            "#,
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(case.id)
            .bind(quote.id)
            .bind(case.client_id)
            .bind(quote.amount_cents)
            .bind(PaymentStatus::Initiated.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// Bring a reused INITIATED payment in line with the quote's current amount.
    /// Only while no provider session exists, since the provider charges what it was given.
    pub async fn refresh_amount(
        conn: &mut PgConnection,
        payment_id: PaymentId,
        amount_cents: AmountCents,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            r#"
            UPDATE payments SET amount_cents = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3 AND provider_session_id IS NULL
            RETURNING {}
            "#,
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(amount_cents)
            .bind(payment_id)
            .bind(PaymentStatus::Initiated.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// Set the provider session id once. None if already set or not INITIATED.
    pub async fn attach_session(
        conn: &mut PgConnection,
        payment_id: PaymentId,
        session_id: &str,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            r#"
            UPDATE payments SET provider_session_id = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3 AND provider_session_id IS NULL
            RETURNING {}
            "#,
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(payment_id)
            .bind(PaymentStatus::Initiated.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// INITIATED -> SETTLED. Keeps an existing provider payment id.
    pub async fn mark_settled(
        conn: &mut PgConnection,
        payment_id: PaymentId,
        provider_payment_id: Option<&str>,
    ) -> Result<bool, MarketError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                provider_payment_id = COALESCE(provider_payment_id, $2),
                updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(PaymentStatus::Settled.as_str())
        .bind(provider_payment_id)
        .bind(payment_id)
        .bind(PaymentStatus::Initiated.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// INITIATED -> FAILED. None if the payment is not INITIATED.
    pub async fn mark_failed(
        conn: &mut PgConnection,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            r#"
            UPDATE payments SET status = $1, failure_reason = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(PaymentStatus::Failed.as_str())
            .bind(reason)
            .bind(payment_id)
            .bind(PaymentStatus::Initiated.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }

    /// INITIATED -> FAILED, but only while no provider session is attached.
    /// Once the provider holds a session, only its own events decide the outcome.
    pub async fn abandon_unattached(
        conn: &mut PgConnection,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<Option<Payment>, MarketError> {
        let sql = format!(
            r#"
            UPDATE payments SET status = $1, failure_reason = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4 AND provider_session_id IS NULL
            RETURNING {}
            "#,
            Payment::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(PaymentStatus::Failed.as_str())
            .bind(reason)
            .bind(payment_id)
            .bind(PaymentStatus::Initiated.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Payment::from_row).transpose()
    }
}
