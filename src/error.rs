//! Marketplace Error Types
//!
//! Four-way taxonomy shared by every core operation. State-machine
//! violations are always `Conflict`; storage failures are `Internal`.

use thiserror::Error;

/// Marketplace error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    /// Case, quote or payment absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor not authorized for this resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// State-machine violation (case not open, quote immutable, amount mismatch, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage or transaction failure, or a broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn not_found(what: impl Into<String>) -> Self {
        MarketError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        MarketError::Forbidden(why.into())
    }

    pub fn conflict(why: impl Into<String>) -> Self {
        MarketError::Conflict(why.into())
    }

    pub fn internal(why: impl Into<String>) -> Self {
        MarketError::Internal(why.into())
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::NotFound(_) => "NOT_FOUND",
            MarketError::Forbidden(_) => "FORBIDDEN",
            MarketError::Conflict(_) => "CONFLICT",
            MarketError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            MarketError::NotFound(_) => 404,
            MarketError::Forbidden(_) => 403,
            MarketError::Conflict(_) => 409,
            MarketError::Internal(_) => 500,
        }
    }

    /// Message safe to show to API callers (internal details stay in logs)
    pub fn public_message(&self) -> String {
        match self {
            MarketError::Internal(_) => "internal error".to_string(),
            MarketError::NotFound(m) | MarketError::Forbidden(m) | MarketError::Conflict(m) => {
                m.clone()
            }
        }
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => MarketError::NotFound("row not found".to_string()),
            other => MarketError::Internal(format!("database error: {}", other)),
        }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
