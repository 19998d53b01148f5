//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::MarketError;

/// Schema applied at startup and by the test harness (idempotent DDL)
pub const SCHEMA_SQL: &str = include_str!("../../migrations/001_init.sql");

const MIGRATION_LOCK_KEY: i64 = 0x0CA5_E5E7;

/// PostgreSQL database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedding)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Apply the schema (CREATE ... IF NOT EXISTS, safe to re-run)
    ///
    /// Concurrent CREATE IF NOT EXISTS can still collide in the catalog, so
    /// instances serialize on an advisory lock.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        let applied = sqlx::raw_sql(SCHEMA_SQL).execute(&mut *conn).await;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;
        applied?;
        tracing::info!("Database schema applied");
        Ok(())
    }
}

/// Decode a status column into its enum, treating unknown values as corruption
pub(crate) fn decode_status<T>(
    raw: &str,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, MarketError> {
    parse(raw).ok_or_else(|| {
        tracing::error!(column, value = raw, "Unknown status value in database");
        MarketError::internal(format!("unknown {} value: {}", column, raw))
    })
}
