//! Settlement Records and the Settlement Transaction Engine
//!
//! # Flow
//!
//! ```text
//! start_settlement(quote) ──▶ payment INITIATED
//!                                   │
//!        direct complete ──┐        │
//!                          ├──▶ attempt(payment) ──▶ SETTLED + case ENGAGED
//!   provider callback ─────┘   (resolve first)
//! ```
//!
//! Both completion triggers end in [`SettlementEngine::attempt`], keyed by
//! payment id. The engine is safe to call any number of times, concurrently.

pub mod callback;
pub mod checkout;
pub mod models;
pub mod repository;
pub mod settlement;

pub use callback::{CallbackOutcome, CallbackProcessor, ProviderEvent, ProviderEventKind};
pub use checkout::CheckoutService;
pub use models::{Payment, PaymentStatus, SettlementOutcome, SettlementTrigger, TriggerSource};
pub use repository::PaymentRepository;
pub use settlement::SettlementEngine;
