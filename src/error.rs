//! Typed error kinds for every external call site.

use thiserror::Error;

/// Failure of an Exchange call, already classified into the policy kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Timeout or connection failure. Retry inside the background task; stale data on the tick path.
    #[error("network: {0}")]
    NetworkTransient(String),

    /// Fewer units held than requested. Treat as already liquidated.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Rejected for any other reason (no match, no book, invalid size).
    #[error("order rejected: {0}")]
    RejectedOrder(String),

    /// Market outcome not yet queryable.
    #[error("resolution unavailable")]
    ResolutionUnavailable,

    /// No bid depth at any price. The next attempt goes straight to the floor.
    #[error("no liquidity: {0}")]
    CatastrophicLiquidity(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    /// Classify a venue error message.
    pub fn from_venue_message(msg: &str) -> Self {
        if is_position_closed_error(msg) {
            return ExchangeError::InsufficientBalance(msg.to_string());
        }
        let lower = msg.to_lowercase();
        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("service unavailable")
        {
            return ExchangeError::NetworkTransient(msg.to_string());
        }
        // Unmatched FAK/FOK kills and missing books are plain rejections; the caller retries
        // at a lower price.
        ExchangeError::RejectedOrder(msg.to_string())
    }

    /// True when retrying the same call may succeed. Liquidation and resolution loops stop on
    /// anything else.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkTransient(_)
                | ExchangeError::RejectedOrder(_)
                | ExchangeError::CatastrophicLiquidity(_)
                | ExchangeError::ResolutionUnavailable
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::NetworkTransient(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ExchangeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ExchangeError::NetworkTransient("deadline elapsed".to_string())
    }
}

/// True if the venue says the position is already gone (already sold or no balance).
fn is_position_closed_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("not enough balance")
        || lower.contains("allowance")
        || lower.contains("insufficient balance")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("window {got} is not the live window ({live:?})")]
    WindowMismatch { got: String, live: Option<String> },

    #[error("position already open for window {0}")]
    AlreadyOpen(String),

    #[error("invalid fill: {0}")]
    InvalidFill(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("inconsistent thresholds: {0}")]
    Inconsistent(String),
}
