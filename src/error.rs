//! Engine error taxonomy
//!
//! Fills and order-status transitions are data, not errors; these variants
//! cover the failure paths only.

use thiserror::Error;

/// Failure modes of the trading core
#[derive(Debug, Error)]
pub enum EngineError {
    /// Retryable exchange failure. Retried with bounded exponential backoff;
    /// after the attempt budget is spent the affected grid level is marked
    /// degraded and skipped for the rest of the tick.
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    /// No regime model is loaded. The engine falls back to the widest
    /// spacing and reduced size rather than halting.
    #[error("regime model unavailable: {0}")]
    ModelUnavailable(String),

    /// A risk limit was breached and the session force-liquidated. Terminal:
    /// the engine stays halted until an operator restarts it.
    #[error("risk breach: {0}")]
    RiskBreach(String),

    /// Market snapshot is stale or missing; the tick is skipped so the grid
    /// is never regenerated from a stale reference price.
    #[error("market data gap: {0}")]
    DataGap(String),

    /// Checkpoint or event persistence failed. The prior checkpoint remains
    /// intact; trading continues only while in-memory state is consistent.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Whether the failure is worth retrying against the exchange
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientExchange(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::TransientExchange(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
