//! Audit Trail
//!
//! Append-only `case_histories` rows for case status transitions.
//!
//! Writes are best effort but never silently lost:
//! 1. Inside the caller's transaction the insert runs under a SAVEPOINT, so a
//!    failing insert cannot poison the surrounding settlement.
//! 2. A failed entry is handed back to the caller, which enqueues it only
//!    after its own commit succeeded.
//! 3. [`AuditRetryWorker`] drains the queue and re-inserts with bounded retries.
//!
//! Entry ids are generated up front, so a retried insert is idempotent.

pub mod models;
pub mod worker;
pub mod writer;

pub use models::{HistoryAction, HistoryEntry};
pub use worker::{AuditRetryWorker, RetryConfig};
pub use writer::AuditTrail;
