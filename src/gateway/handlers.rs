//! HTTP handlers. Thin: parse, validate, call the service, wrap the result.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use validator::Validate;

use super::auth::shared_secret_matches;
use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, AttachSessionRequest, CommentRequest, CreateCaseRequest,
    FailPaymentRequest, HealthResponse, MockCompleteRequest, SubmitQuoteRequest, error_codes, ok,
};
use crate::audit::HistoryEntry;
use crate::cases::{Case, CaseStatus};
use crate::core_types::{Actor, Role};
use crate::error::MarketError;
use crate::payments::{CallbackOutcome, Payment, ProviderEvent, SettlementOutcome};
use crate::quotes::Quote;

pub const DEV_SECRET_HEADER: &str = "x-dev-secret";
pub const CALLBACK_SECRET_HEADER: &str = "x-callback-secret";

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                status: "ok",
                version: env!("GIT_HASH"),
            })),
        ),
        Err(e) => {
            tracing::error!("[HEALTH] PostgreSQL ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    code: error_codes::SERVICE_UNAVAILABLE,
                    msg: "unavailable".to_string(),
                    data: None,
                }),
            )
        }
    }
}

// ============================================================================
// Cases
// ============================================================================

pub async fn create_case(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateCaseRequest>,
) -> ApiResult<Case> {
    let input = req.into_new_case()?;
    ok(state.cases.create(&actor, input).await?)
}

pub async fn get_case(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<Case> {
    let case = state.cases.get(case_id).await?;
    // Open cases are visible to every lawyer; otherwise owner or winner only
    let visible = case.is_owned_by(actor.id)
        || (case.status.has_winner() && case.accepted_lawyer_id == Some(actor.id))
        || (actor.role == Role::Lawyer && case.status == CaseStatus::Open);
    if !visible {
        return Err(MarketError::forbidden("no access to case").into());
    }
    ok(case)
}

pub async fn cancel_case(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(case_id): Path<Uuid>,
    body: Option<Json<CommentRequest>>,
) -> ApiResult<Case> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    req.validate()?;
    ok(state.cases.cancel(case_id, &actor, &req.comment).await?)
}

pub async fn close_case(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(case_id): Path<Uuid>,
    body: Option<Json<CommentRequest>>,
) -> ApiResult<Case> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    req.validate()?;
    ok(state.cases.close(case_id, &actor, &req.comment).await?)
}

pub async fn case_history(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<Vec<HistoryEntry>> {
    ok(state.cases.list_history(case_id, &actor).await?)
}

// ============================================================================
// Quotes
// ============================================================================

pub async fn submit_quote(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SubmitQuoteRequest>,
) -> ApiResult<Quote> {
    let submission = req.into_submission()?;
    ok(state.quotes.submit_or_update(&actor, submission).await?)
}

pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Payment> {
    ok(state.checkout.start_settlement(quote_id, &actor).await?)
}

// ============================================================================
// Payments
// ============================================================================

async fn payment_for_payer(
    state: &AppState,
    payment_id: Uuid,
    actor: &Actor,
) -> Result<Payment, ApiError> {
    let payment = state.checkout.get(payment_id).await?;
    if actor.role != Role::Client || payment.client_id != actor.id {
        return Err(MarketError::forbidden("not the payer").into());
    }
    Ok(payment)
}

pub async fn attach_session(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<AttachSessionRequest>,
) -> ApiResult<Payment> {
    req.validate()?;
    payment_for_payer(&state, payment_id, &actor).await?;
    ok(state
        .checkout
        .attach_provider_session(payment_id, &req.session_id)
        .await?)
}

pub async fn fail_payment(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<FailPaymentRequest>,
) -> ApiResult<Payment> {
    req.validate()?;
    payment_for_payer(&state, payment_id, &actor).await?;
    ok(state.checkout.abandon(payment_id, &req.reason).await?)
}

/// Dev-only synchronous completion. Routed only when enabled in config.
pub async fn mock_complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MockCompleteRequest>,
) -> ApiResult<SettlementOutcome> {
    let expected = state
        .mock_secret
        .as_deref()
        .ok_or_else(|| ApiError::from(MarketError::not_found("mock payments disabled")))?;
    if !shared_secret_matches(&headers, DEV_SECRET_HEADER, expected) {
        warn!(payment_id = %req.payment_id, "Mock complete rejected: bad dev secret");
        return Err(MarketError::forbidden("invalid dev secret").into());
    }
    ok(state.settlement.settle_direct(req.payment_id).await?)
}

/// Provider notification, relayed by the signature-verifying edge with the callback secret
pub async fn provider_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<ProviderEvent>,
) -> ApiResult<CallbackOutcome> {
    let authorized = state
        .callback_secret
        .as_deref()
        .is_some_and(|expected| shared_secret_matches(&headers, CALLBACK_SECRET_HEADER, expected));
    if !authorized {
        warn!(kind = ?event.kind, "Provider callback rejected: bad callback secret");
        return Err(ApiError::Unauthorized(
            error_codes::AUTH_FAILED,
            "Invalid callback secret",
        ));
    }
    ok(state.callbacks.process(&event).await?)
}
