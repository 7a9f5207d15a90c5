//! Error taxonomy for the trading agent.

use thiserror::Error;

/// Maximum orders per batch request.
pub const MAX_BATCH_SIZE: usize = 20;

/// A risk limit was breached. Always terminal: the session closes its
/// position and shuts down.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("position limit exceeded: |{inventory}| > {limit}")]
    PositionLimitExceeded { limit: i64, inventory: i64 },

    #[error("balance limit exceeded: {balance:.2} < {minimum:.2}")]
    BalanceLimitExceeded { minimum: f64, balance: f64 },
}

/// Local state disagrees with observed market or portfolio data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("orderbook stale for {age_secs:.1}s")]
    StaleOrderbook { age_secs: f64 },

    #[error("position mismatch: remote {remote} vs local {local}")]
    PositionMismatch { remote: i64, local: i64 },

    #[error("balance mismatch: remote {remote:.2} vs local {local:.2}")]
    BalanceMismatch { remote: f64, local: f64 },

    #[error("order tracking mismatch")]
    OrderMismatch,
}

/// An order placement or cancellation failed. Non-terminal; triggers a
/// resync of order state.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("order rejected ({code}): {message}")]
    OrderRejection { code: String, message: String },

    #[error("cancel failure: {0}")]
    CancelFailure(String),

    #[error("malformed fill: {0}")]
    MalformedFill(String),
}

/// Transport-level failures. Retried per policy before surfacing;
/// `AuthFailed` is terminal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    TimedOut,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("authentication failed")]
    AuthFailed,

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("risk limit: {0}")]
    Risk(#[from] RiskError),

    #[error("data accuracy: {0}")]
    Data(#[from] DataError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("failed to read private key file '{0}': {1}")]
    PrivateKeyFileError(String, String),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(String),

    #[error("batch size {0} exceeds maximum of {MAX_BATCH_SIZE}")]
    BatchSizeExceeded(usize),

    #[error("invalid price {0}: must be between 0.01 and 0.99")]
    InvalidPrice(f64),

    #[error("invalid quantity {0}: must be positive")]
    InvalidQuantity(i64),

    #[error("insufficient candle data: {0} usable candles")]
    InsufficientData(usize),

    #[error("socket not connected")]
    NotConnected,

    #[error("connection retries exhausted after {0} attempts")]
    RetriesExhausted(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Whether this error must terminate the session. Risk limits and
    /// authentication failures are never retried or swallowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Risk(_) | Error::Transport(TransportError::AuthFailed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_errors_are_terminal() {
        let err = Error::Risk(RiskError::PositionLimitExceeded {
            limit: 50,
            inventory: 52,
        });
        assert!(err.is_terminal());

        let err = Error::Transport(TransportError::AuthFailed);
        assert!(err.is_terminal());
    }

    #[test]
    fn test_transport_errors_are_not_terminal() {
        assert!(!Error::Transport(TransportError::TimedOut).is_terminal());
        assert!(!Error::Transport(TransportError::RateLimited).is_terminal());
    }

    #[test]
    fn test_display_includes_values() {
        let err = RiskError::PositionLimitExceeded {
            limit: 50,
            inventory: -61,
        };
        assert!(err.to_string().contains("|-61| > 50"));
    }
}
