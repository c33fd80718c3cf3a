use thiserror::Error;

/// All errors generated by the aggregation engines and their feed adapters.
///
/// Tick-level problems (malformed instruments, missing fields) are not errors:
/// the offending tick is skipped and counted, and the stream continues. Only
/// connection-level failures may restart a feed.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscription error: {0}")]
    Subscribe(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Determine if this error requires the feed to reconnect from scratch.
    pub fn is_connection(&self) -> bool {
        matches!(self, EngineError::Connection(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Connection(value.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(value: reqwest::Error) -> Self {
        EngineError::Subscribe(value.to_string())
    }
}
