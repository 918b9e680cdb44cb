//! Error taxonomy for establishing a live session.

use thiserror::Error;

/// Errors surfaced by `connect` on either backend or on the manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The handle failed local validation. Never reaches the network.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The requested connect mode is not one of official, raw or auto.
    #[error("Invalid connect mode: {0}")]
    InvalidMode(String),

    /// Another connect is already in flight.
    #[error("A connect attempt is already in progress")]
    AlreadyConnecting,

    /// The target is not live, or its room could not be resolved.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// No response within the configured window.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Socket or HTTP level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connector library rejected the connection.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The attempt was cancelled by `disconnect`.
    #[error("Connect attempt cancelled")]
    Cancelled,

    /// Auto mode exhausted every backend it was allowed to try.
    #[error("{}", combined_reason(official, raw.as_deref()))]
    AllBackendsFailed {
        /// Why the official backend failed.
        official: Box<ConnectError>,

        /// Why the raw fallback failed, if it was attempted.
        raw: Option<Box<ConnectError>>,
    },
}

fn combined_reason(official: &ConnectError, raw: Option<&ConnectError>) -> String {
    match raw {
        Some(raw) => format!("official backend failed ({official}); raw fallback failed ({raw})"),
        None => format!("official backend failed ({official}); fallback disabled"),
    }
}
