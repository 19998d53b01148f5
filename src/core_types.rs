//! Core types used throughout the system
//!
//! Identifiers are PostgreSQL `UUID` columns. The aliases give them
//! semantic meaning at call sites without newtype ceremony.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Case ID - the shared resource lawyers bid on.
pub type CaseId = Uuid;

/// Quote ID - one lawyer's offer against a case.
pub type QuoteId = Uuid;

/// Payment ID - one settlement attempt for a quote.
pub type PaymentId = Uuid;

/// User ID - client or lawyer, resolved by the identity boundary.
pub type UserId = Uuid;

/// Money is stored in minor units (cents) to avoid float issues.
pub type AmountCents = i64;

/// Role of an authenticated actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Posts cases and pays for the accepted quote
    Client,
    /// Bids on open cases
    Lawyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Lawyer => "lawyer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "lawyer" => Ok(Role::Lawyer),
            _ => Err(()),
        }
    }
}

/// Verified identity handed to every core operation.
///
/// The core trusts this verbatim; verification happens at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn client(id: UserId) -> Self {
        Self {
            id,
            role: Role::Client,
        }
    }

    pub fn lawyer(id: UserId) -> Self {
        Self {
            id,
            role: Role::Lawyer,
        }
    }
}
