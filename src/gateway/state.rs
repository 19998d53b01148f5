use std::sync::Arc;

use super::auth::JwtAuth;
use crate::audit::AuditTrail;
use crate::cases::CaseService;
use crate::config::AppConfig;
use crate::db::Database;
use crate::payments::{CallbackProcessor, CheckoutService, SettlementEngine};
use crate::quotes::QuoteService;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cases: Arc<CaseService>,
    pub quotes: Arc<QuoteService>,
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementEngine>,
    pub callbacks: Arc<CallbackProcessor>,
    pub jwt: JwtAuth,
    /// Dev secret for the mock complete route; None when the route is disabled
    pub mock_secret: Option<String>,
    /// Provider relay secret; None leaves the callback route unregistered
    pub callback_secret: Option<String>,
}

impl AppState {
    pub fn new(db: Database, audit: AuditTrail, config: &AppConfig) -> Self {
        let checkout = Arc::new(CheckoutService::new(db.clone()));
        let settlement = Arc::new(SettlementEngine::new(db.clone(), audit.clone()));
        let callbacks = Arc::new(CallbackProcessor::new(
            db.clone(),
            settlement.clone(),
            checkout.clone(),
        ));
        let mock_secret = if config.mock_complete_enabled() {
            config.payments.dev_secret.clone()
        } else {
            None
        };

        Self {
            cases: Arc::new(CaseService::new(db.clone(), audit)),
            quotes: Arc::new(QuoteService::new(db.clone())),
            checkout,
            settlement,
            callbacks,
            jwt: JwtAuth::new(config.auth.jwt_secret.clone()),
            mock_secret,
            callback_secret: config.callback_secret().map(str::to_string),
            db,
        }
    }
}
