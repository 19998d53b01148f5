//! Resource Ledger: cases and their status machine
//!
//! ```text
//! OPEN ──settle──▶ ENGAGED ──close──▶ CLOSED
//!   │
//!   └──cancel──▶ CANCELLED
//! ```
//!
//! `accepted_quote_id` is set iff the case is ENGAGED or CLOSED.
//! Only the settlement engine moves a case out of OPEN towards ENGAGED.

pub mod models;
pub mod repository;
pub mod service;

pub use models::{Case, CaseStatus, NewCase};
pub use repository::CaseRepository;
pub use service::CaseService;
