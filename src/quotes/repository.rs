//! Quote persistence

use sqlx::PgConnection;

use super::models::{Quote, QuoteStatus, QuoteSubmission};
use crate::core_types::{CaseId, QuoteId, UserId};
use crate::error::MarketError;

pub struct QuoteRepository;

impl QuoteRepository {
    pub async fn get(
        conn: &mut PgConnection,
        quote_id: QuoteId,
    ) -> Result<Option<Quote>, MarketError> {
        let sql = format!("SELECT {} FROM quotes WHERE id = $1", Quote::COLUMNS);
        let row = sqlx::query(&sql)
            .bind(quote_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Quote::from_row).transpose()
    }

    /// The (case, lawyer) row, if any
    pub async fn find_for_lawyer(
        conn: &mut PgConnection,
        case_id: CaseId,
        lawyer_id: UserId,
    ) -> Result<Option<Quote>, MarketError> {
        let sql = format!(
            "SELECT {} FROM quotes WHERE case_id = $1 AND lawyer_id = $2",
            Quote::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(case_id)
            .bind(lawyer_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Quote::from_row).transpose()
    }

    pub async fn list_for_case(
        conn: &mut PgConnection,
        case_id: CaseId,
    ) -> Result<Vec<Quote>, MarketError> {
        let sql = format!(
            "SELECT {} FROM quotes WHERE case_id = $1 ORDER BY created_at ASC, id ASC",
            Quote::COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(case_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(Quote::from_row).collect()
    }

    pub async fn insert(
        conn: &mut PgConnection,
        lawyer_id: UserId,
        input: &QuoteSubmission,
    ) -> Result<Quote, MarketError> {
        let sql = format!(
            "INSERT INTO quotes (case_id, lawyer_id, amount_cents, days, note, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            Quote::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(input.case_id)
            .bind(lawyer_id)
            .bind(input.amount_cents)
            .bind(input.days)
            .bind(&input.note)
            .bind(QuoteStatus::Proposed.as_str())
            .fetch_one(&mut *conn)
            .await?;
        Quote::from_row(&row)
    }

    /// Overwrite terms of a PROPOSED quote. Returns None if it is no longer PROPOSED.
    pub async fn update_terms(
        conn: &mut PgConnection,
        quote_id: QuoteId,
        input: &QuoteSubmission,
    ) -> Result<Option<Quote>, MarketError> {
        let sql = format!(
            "UPDATE quotes SET amount_cents = $1, days = $2, note = $3, updated_at = NOW() \
             WHERE id = $4 AND status = $5 RETURNING {}",
            Quote::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(input.amount_cents)
            .bind(input.days)
            .bind(&input.note)
            .bind(quote_id)
            .bind(QuoteStatus::Proposed.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Quote::from_row).transpose()
    }

    /// Winner transition. Idempotent: an already ACCEPTED row counts as success.
    pub async fn accept(conn: &mut PgConnection, quote_id: QuoteId) -> Result<bool, MarketError> {
        let result = sqlx::query(
            "UPDATE quotes SET status = $1, updated_at = NOW() WHERE id = $2 AND status IN ($3, $1)",
        )
        .bind(QuoteStatus::Accepted.as_str())
        .bind(quote_id)
        .bind(QuoteStatus::Proposed.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reject every still-PROPOSED sibling of the winner. Returns rows touched.
    pub async fn reject_siblings(
        conn: &mut PgConnection,
        case_id: CaseId,
        winner_id: QuoteId,
    ) -> Result<u64, MarketError> {
        let result = sqlx::query(
            r#"
            UPDATE quotes SET status = $1, updated_at = NOW()
            WHERE case_id = $2 AND id <> $3 AND status = $4
            "#,
        )
        .bind(QuoteStatus::Rejected.as_str())
        .bind(case_id)
        .bind(winner_id)
        .bind(QuoteStatus::Proposed.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
