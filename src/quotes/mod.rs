//! Offer Store and Offer Lifecycle Manager
//!
//! One quote row per (case, lawyer). A lawyer's later submissions overwrite
//! the same row while it is PROPOSED and the case is OPEN. ACCEPTED and
//! REJECTED are terminal and only the settlement sweep sets them.

pub mod models;
pub mod repository;
pub mod service;

pub use models::{Quote, QuoteStatus, QuoteSubmission};
pub use repository::QuoteRepository;
pub use service::QuoteService;
