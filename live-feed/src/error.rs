use thiserror::Error;

/// All errors generated in `live-feed`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FeedError {
    #[error("display cap must be at least 1, got: {0}")]
    InvalidDisplayCap(usize),

    #[error("invalid feed configuration: {0}")]
    InvalidConfig(String),

    #[error("received empty batch")]
    EmptyBatch,

    #[error("malformed feed data: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("feed closed by peer")]
    Closed,

    #[error("renderer has stopped")]
    RendererStopped,
}

impl FeedError {
    /// Determine if an error means the source is no longer delivering data, which moves the
    /// renderer to [`ConnectionStatus::Disconnected`](crate::status::ConnectionStatus).
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transport(&self) -> bool {
        match self {
            FeedError::Transport(_) | FeedError::Http(_) | FeedError::Closed => true,
            _ => false,
        }
    }

    /// Data errors are skipped locally, leaving the prior window intact.
    pub fn is_data(&self) -> bool {
        matches!(self, FeedError::EmptyBatch | FeedError::Malformed(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Malformed(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match value {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<url::ParseError> for FeedError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_classification() {
        struct TestCase {
            input: FeedError,
            transport: bool,
            data: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: socket failure is a transport error
                input: FeedError::Transport("Io(Kind(UnexpectedEof))".to_string()),
                transport: true,
                data: false,
            },
            TestCase {
                // TC1: failed poll is a transport error
                input: FeedError::Http("503 Service Unavailable".to_string()),
                transport: true,
                data: false,
            },
            TestCase {
                // TC2: peer close is a transport error
                input: FeedError::Closed,
                transport: true,
                data: false,
            },
            TestCase {
                // TC3: empty batch is a data error
                input: FeedError::EmptyBatch,
                transport: false,
                data: true,
            },
            TestCase {
                // TC4: missing field is a data error
                input: FeedError::Malformed("missing field `quote`".to_string()),
                transport: false,
                data: true,
            },
            TestCase {
                // TC5: contract violation is neither
                input: FeedError::InvalidDisplayCap(0),
                transport: false,
                data: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.is_transport(), test.transport, "TC{} failed", index);
            assert_eq!(test.input.is_data(), test.data, "TC{} failed", index);
        }
    }

    #[test]
    fn test_json_error_is_malformed() {
        let error = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        assert!(matches!(FeedError::from(error), FeedError::Malformed(_)));
    }

    #[test]
    fn test_ws_close_is_closed() {
        let error = tokio_tungstenite::tungstenite::Error::ConnectionClosed;
        assert_eq!(FeedError::from(error), FeedError::Closed);
    }
}
