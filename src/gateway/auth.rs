//! Bearer token identity (HS256)
//!
//! Tokens are minted by the identity service; this side only verifies them
//! and turns the claims into an [`Actor`] for the handlers.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::state::AppState;
use super::types::{ApiError, error_codes};
use crate::core_types::{Actor, Role};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id (uuid)
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Clone)]
pub struct JwtAuth {
    secret: String,
}

impl JwtAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue_token(&self, actor: &Actor, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(ttl)
            .context("token expiry out of range")?;
        let claims = Claims {
            sub: actor.id.to_string(),
            role: actor.role,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate token")
    }

    pub fn verify_token(&self, token: &str) -> Result<Actor> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<Claims>(token, &decoding_key, &validation)?.claims;
        let id: Uuid = claims.sub.parse().context("subject is not a uuid")?;
        Ok(Actor {
            id,
            role: claims.role,
        })
    }
}

/// Constant-time check of a shared-secret header. A blank secret never matches.
pub fn shared_secret_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    if expected.trim().is_empty() {
        return false;
    }
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
}

/// Verifies the bearer token and injects the [`Actor`] into request extensions
pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized(
            error_codes::MISSING_AUTH,
            "Missing Authorization header",
        ))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized(
        error_codes::AUTH_FAILED,
        "Invalid token format",
    ))?;

    let actor = state.jwt.verify_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        ApiError::Unauthorized(error_codes::AUTH_FAILED, "Invalid or expired token")
    })?;

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
