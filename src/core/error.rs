//! Error types for fulfillment operations.

use thiserror::Error;

use crate::core::id_set::DecodeError;
use crate::core::model::Money;

/// Errors reported by storage backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
    /// A uniqueness or state constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A row changed between the read a write was based on and the write.
    #[error("stale write: {0}")]
    Stale(String),
    /// The backend could not be reached or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Persisting or loading backend state failed.
    #[error("storage io error: {0}")]
    Io(String),
}

/// Outcome signals of the mechanic matcher that are not a selected mechanic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    /// No mechanic has ever been eligible for the booking.
    #[error("no eligible mechanic")]
    NotFound,
    /// Eligible mechanics exist but all of them were tried in this cycle.
    #[error("all eligible mechanics visited in this cycle")]
    ExhaustedCycle,
    /// Storage failed during the candidate search.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the fulfillment service boundary.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The user cannot cover the booking fee.
    #[error("insufficient funds: balance {balance}, fee {fee}")]
    InsufficientFunds {
        /// Balance at the time of the check.
        balance: Money,
        /// Fee that had to be covered.
        fee: Money,
    },
    /// The request payload was rejected before any work began.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No mechanic could be matched for a new booking.
    #[error("no mechanic available at this time")]
    NoMechanic,
    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Exclusion sets of a booking could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Storage failed.
    #[error(transparent)]
    Store(StoreError),
    /// An upstream fetch did not finish in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// Configuration was invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::Conflict(what),
            other => Self::Store(other),
        }
    }
}

impl From<MatchError> for FulfillmentError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NotFound | MatchError::ExhaustedCycle => Self::NoMechanic,
            MatchError::Store(store) => store.into(),
        }
    }
}

impl FulfillmentError {
    /// Whether the failure came from a write racing a concurrent change, so
    /// re-reading and retrying can succeed.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Store(StoreError::Stale(_)))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
