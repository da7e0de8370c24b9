use thiserror::Error;

/// Errors raised by the replay core.
///
/// `FeedExhausted` and `TransportClosed` are normal ways for a session to end;
/// the rest are reported to the caller or logged and the session continues.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The feed has no more candles inside its window
    #[error("feed exhausted")]
    FeedExhausted,

    /// Upstream historical-data call failed (never retried)
    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(String),

    /// Malformed or incomplete client request
    #[error("invalid order request: {0}")]
    InvalidOrderRequest(String),

    /// Well-formed order that the current position state does not allow
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Peer disconnected or sent a close frame
    #[error("transport closed")]
    TransportClosed,

    /// Serialization of an outbound event failed
    #[error("encode failure: {0}")]
    EncodeFailure(#[from] serde_json::Error),
}

impl ReplayError {
    /// True when the session can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReplayError::InvalidOrderRequest(_)
                | ReplayError::OrderRejected(_)
                | ReplayError::EncodeFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(ReplayError::InvalidOrderRequest("qty".into()).is_recoverable());
        assert!(ReplayError::OrderRejected("open".into()).is_recoverable());
        assert!(!ReplayError::FeedExhausted.is_recoverable());
        assert!(!ReplayError::TransportClosed.is_recoverable());
        assert!(!ReplayError::UpstreamFetchFailed("timeout".into()).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = ReplayError::InvalidOrderRequest("missing side".into());
        assert_eq!(err.to_string(), "invalid order request: missing side");
    }
}
