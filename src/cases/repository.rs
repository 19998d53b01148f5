//! Case persistence. Every function takes a connection so it can run
//! inside the caller's transaction (`&mut *tx`).

use sqlx::PgConnection;

use super::models::{Case, CaseStatus, NewCase};
use crate::core_types::{CaseId, QuoteId, UserId};
use crate::error::MarketError;

pub struct CaseRepository;

impl CaseRepository {
    /// Insert a new OPEN case
    pub async fn create(
        conn: &mut PgConnection,
        client_id: UserId,
        input: &NewCase,
    ) -> Result<Case, MarketError> {
        let sql = format!(
            "INSERT INTO cases (client_id, title, category, description, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            Case::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(client_id)
            .bind(input.title.trim())
            .bind(input.category.trim())
            .bind(input.description.trim())
            .bind(CaseStatus::Open.as_str())
            .fetch_one(&mut *conn)
            .await?;
        Case::from_row(&row)
    }

    /// Plain read, no lock
    pub async fn get(conn: &mut PgConnection, case_id: CaseId) -> Result<Option<Case>, MarketError> {
        let sql = format!("SELECT {} FROM cases WHERE id = $1", Case::COLUMNS);
        let row = sqlx::query(&sql)
            .bind(case_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Case::from_row).transpose()
    }

    /// Read and take the row lock (`FOR UPDATE`) until the transaction ends
    pub async fn lock(
        conn: &mut PgConnection,
        case_id: CaseId,
    ) -> Result<Option<Case>, MarketError> {
        let sql = format!(
            "SELECT {} FROM cases WHERE id = $1 FOR UPDATE",
            Case::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(case_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Case::from_row).transpose()
    }

    /// Guarded status change (`WHERE status = expected`).
    ///
    /// Returns false when the row was not in the expected state.
    pub async fn transition(
        conn: &mut PgConnection,
        case_id: CaseId,
        expected: CaseStatus,
        next: CaseStatus,
    ) -> Result<bool, MarketError> {
        let result = sqlx::query("UPDATE cases SET status = $1 WHERE id = $2 AND status = $3")
            .bind(next.as_str())
            .bind(case_id)
            .bind(expected.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// OPEN -> ENGAGED with the winner pointers set in the same statement
    pub async fn engage(
        conn: &mut PgConnection,
        case_id: CaseId,
        quote_id: QuoteId,
        lawyer_id: UserId,
    ) -> Result<bool, MarketError> {
        let result = sqlx::query(
            r#"
            UPDATE cases
            SET status = $1, engaged_at = NOW(), accepted_quote_id = $2, accepted_lawyer_id = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(CaseStatus::Engaged.as_str())
        .bind(quote_id)
        .bind(lawyer_id)
        .bind(case_id)
        .bind(CaseStatus::Open.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
