//! Case Market - settlement core for a legal case marketplace
//!
//! Clients post cases, lawyers bid quotes, and exactly one paid quote wins
//! each case. All state lives in PostgreSQL; races are settled by row locks
//! and partial unique indexes rather than in-process coordination.
//!
//! # Modules
//!
//! - [`core_types`] - ids, amounts, [`Actor`]
//! - [`error`] - [`MarketError`] taxonomy
//! - [`cases`] - case state machine, cancel/close, history listing
//! - [`quotes`] - quote submission and overwrite
//! - [`payments`] - checkout, settlement engine, provider callbacks
//! - [`audit`] - append-only case history with post-commit retry
//! - [`gateway`] - axum HTTP surface

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod config;
pub mod db;
pub mod logging;

pub mod audit;
pub mod cases;
pub mod payments;
pub mod quotes;

pub mod gateway;

// Convenient re-exports at crate root
pub use audit::{AuditRetryWorker, AuditTrail, HistoryAction, HistoryEntry, RetryConfig};
pub use cases::{Case, CaseService, CaseStatus, NewCase};
pub use core_types::{Actor, AmountCents, CaseId, PaymentId, QuoteId, Role, UserId};
pub use db::Database;
pub use error::{MarketError, MarketResult};
pub use payments::{
    CallbackOutcome, CallbackProcessor, CheckoutService, Payment, PaymentStatus, ProviderEvent,
    ProviderEventKind, SettlementEngine, SettlementOutcome, SettlementTrigger,
};
pub use quotes::{Quote, QuoteService, QuoteStatus, QuoteSubmission};
