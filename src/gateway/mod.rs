pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use anyhow::{Context, Result};
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use state::AppState;

/// Build the full router
///
/// - `/api/v1/health`: public
/// - `/api/v1/payments/provider/callback`: callback secret, only when configured
/// - `/api/v1/payments/mock/complete`: dev secret, only when enabled
/// - everything else: bearer token
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/cases", post(handlers::create_case))
        .route("/cases/{case_id}", get(handlers::get_case))
        .route("/cases/{case_id}/cancel", post(handlers::cancel_case))
        .route("/cases/{case_id}/close", post(handlers::close_case))
        .route("/cases/{case_id}/history", get(handlers::case_history))
        .route("/quotes", post(handlers::submit_quote))
        .route("/quotes/{quote_id}/checkout", post(handlers::start_checkout))
        .route("/payments/{payment_id}/session", post(handlers::attach_session))
        .route("/payments/{payment_id}/fail", post(handlers::fail_payment))
        .route_layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    let mut public = Router::new().route("/health", get(handlers::health_check));

    if state.callback_secret.is_some() {
        public = public.route(
            "/payments/provider/callback",
            post(handlers::provider_callback),
        );
    } else {
        warn!("No callback secret configured; provider callback route disabled");
    }

    if state.mock_secret.is_some() {
        warn!("Mock payment completion route ENABLED (dev only)");
        public = public.route("/payments/mock/complete", post(handlers::mock_complete));
    }

    Router::new()
        .nest("/api/v1", protected.merge(public))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
