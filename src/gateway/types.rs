//! API request/response types
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` wrapper
//! - `ApiError`: maps core errors onto HTTP status + envelope
//! - request DTOs, validated with `validator` before reaching the services

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::cases::NewCase;
use crate::error::MarketError;
use crate::quotes::QuoteSubmission;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, omitted on error
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error; renders as the unified envelope
#[derive(Debug)]
pub enum ApiError {
    Market(MarketError),
    Invalid(String),
    Unauthorized(i32, &'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Market(e) => {
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ApiError::Market(MarketError::NotFound(_)) => error_codes::NOT_FOUND,
            ApiError::Market(MarketError::Forbidden(_)) => error_codes::FORBIDDEN,
            ApiError::Market(MarketError::Conflict(_)) => error_codes::CONFLICT,
            ApiError::Market(MarketError::Internal(_)) => error_codes::INTERNAL_ERROR,
            ApiError::Invalid(_) => error_codes::INVALID_PARAMETER,
            ApiError::Unauthorized(code, _) => *code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Market(e) => e.public_message(),
            ApiError::Invalid(msg) => msg.clone(),
            ApiError::Unauthorized(_, msg) => msg.to_string(),
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        ApiError::Market(e)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self {
        ApiError::Invalid(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Market(MarketError::Internal(detail)) = &self {
            error!(detail = %detail, "Request failed with internal error");
        }
        (
            self.status(),
            Json(ApiResponse::<()>::error(self.code(), self.message())),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCaseRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
}

impl CreateCaseRequest {
    pub fn into_new_case(self) -> Result<NewCase, ApiError> {
        self.validate()?;
        if self.title.trim().is_empty() || self.category.trim().is_empty() {
            return Err(ApiError::Invalid("title and category are required".to_string()));
        }
        Ok(NewCase {
            title: self.title,
            category: self.category,
            description: self.description,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitQuoteRequest {
    pub case_id: Uuid,
    #[validate(range(min = 1, max = 100_000_000))]
    pub amount_cents: i64,
    #[validate(range(min = 1, max = 365))]
    pub days: i32,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub note: String,
}

impl SubmitQuoteRequest {
    pub fn into_submission(self) -> Result<QuoteSubmission, ApiError> {
        self.validate()?;
        Ok(QuoteSubmission::new(
            self.case_id,
            self.amount_cents,
            self.days,
            self.note,
        ))
    }
}

/// Body for cancel/close
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CommentRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub comment: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttachSessionRequest {
    #[validate(length(min = 1, max = 255))]
    pub session_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FailPaymentRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MockCompleteRequest {
    pub payment_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
