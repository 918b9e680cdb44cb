//! Error types for the raw protocol client.

use thiserror::Error;

use livefeed_ipc::ConnectError;

/// Errors that can occur while resolving a room or running a push session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No room id could be extracted; usually the account is not live.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The page fetch or socket open did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// HTTP failure while fetching the room page.
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid push or page URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("Client setup failed: {0}")]
    ClientBuild(String),

    /// A session is already running.
    #[error("Already connected")]
    AlreadyConnected,

    /// The attempt was cancelled.
    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(format!("room page fetch: {e}"))
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<TransportError> for ConnectError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::RoomNotFound(msg) => ConnectError::RoomNotFound(msg),
            TransportError::Timeout(msg) => ConnectError::Timeout(msg),
            TransportError::Cancelled => ConnectError::Cancelled,
            other => ConnectError::Transport(other.to_string()),
        }
    }
}
