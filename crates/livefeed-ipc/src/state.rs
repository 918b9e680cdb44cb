//! Connection state machine types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Which backend is (or was last) driving the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No backend selected.
    #[default]
    None,

    /// Wrapper around the pre-built connector library.
    Official,

    /// Raw protocol client.
    Raw,
}

impl BackendKind {
    /// Returns a simple string representation of the backend.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Official => "official",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle status of the live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session.
    #[default]
    Disconnected,

    /// A connect attempt (or reconnect) is in progress.
    Connecting,

    /// Receiving events.
    Connected,

    /// The last attempt failed; see `failure_reason`.
    Failed,
}

impl ConnectionStatus {
    /// Returns a simple string representation of the status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// How the manager picks a backend for a connect call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Official backend only.
    Official,

    /// Raw backend only.
    Raw,

    /// Official first, raw as fallback.
    #[default]
    Auto,
}

impl ConnectMode {
    /// Returns a simple string representation of the mode.
    pub fn name(self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Raw => "raw",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for ConnectMode {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "official" => Ok(Self::Official),
            "raw" => Ok(Self::Raw),
            "auto" | "" => Ok(Self::Auto),
            other => Err(ConnectError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the connection. Replaced wholesale on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Backend driving the session.
    pub backend_kind: BackendKind,

    /// Current status.
    pub status: ConnectionStatus,

    /// Normalized handle of the target broadcaster.
    pub target_handle: Option<String>,

    /// When the session reached `connected`.
    pub connected_at: Option<DateTime<Utc>>,

    /// Why the last attempt failed. Always set when `status == failed`.
    pub failure_reason: Option<String>,

    /// Whether the raw backend was reached through `auto` fallback.
    pub fallback_used: bool,
}

impl ConnectionState {
    /// The initial, disconnected state.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// An attempt against `handle` is under way.
    pub fn connecting(handle: &str, backend_kind: BackendKind) -> Self {
        Self {
            backend_kind,
            status: ConnectionStatus::Connecting,
            target_handle: Some(handle.to_string()),
            ..Self::default()
        }
    }

    /// The session is live.
    pub fn connected(
        handle: &str,
        backend_kind: BackendKind,
        connected_at: DateTime<Utc>,
        fallback_used: bool,
    ) -> Self {
        Self {
            backend_kind,
            status: ConnectionStatus::Connected,
            target_handle: Some(handle.to_string()),
            connected_at: Some(connected_at),
            failure_reason: None,
            fallback_used,
        }
    }

    /// The attempt failed for `reason`.
    pub fn failed(handle: Option<&str>, backend_kind: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            backend_kind,
            status: ConnectionStatus::Failed,
            target_handle: handle.map(str::to_string),
            connected_at: None,
            failure_reason: Some(reason.into()),
            fallback_used: false,
        }
    }

    /// Returns true if the session is live.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Returns true if an attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        self.status == ConnectionStatus::Connecting
    }

    /// Returns true if there is no session.
    pub fn is_disconnected(&self) -> bool {
        self.status == ConnectionStatus::Disconnected
    }

    /// Returns true if the last attempt failed.
    pub fn is_failed(&self) -> bool {
        self.status == ConnectionStatus::Failed
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        self.status.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("official".parse::<ConnectMode>().unwrap(), ConnectMode::Official);
        assert_eq!(" RAW ".parse::<ConnectMode>().unwrap(), ConnectMode::Raw);
        assert_eq!("".parse::<ConnectMode>().unwrap(), ConnectMode::Auto);
        assert!(matches!(
            "websocket".parse::<ConnectMode>(),
            Err(ConnectError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_failed_state_carries_reason() {
        let state = ConnectionState::failed(Some("someone"), BackendKind::Raw, "room not found");
        assert!(state.is_failed());
        assert_eq!(state.failure_reason.as_deref(), Some("room not found"));
        assert!(state.connected_at.is_none());
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = ConnectionState::connecting("someone", BackendKind::Official);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["backendKind"], "official");
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["targetHandle"], "someone");
        assert_eq!(json["fallbackUsed"], false);
    }
}
