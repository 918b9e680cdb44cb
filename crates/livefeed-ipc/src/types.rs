//! Common types used across the connection API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

/// Counters for the current live session.
///
/// Values are handed out by copy only; there is no way to reach the
/// accumulator's internal instance from outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Current viewers (replaced on each report).
    pub viewer_count: u64,

    /// Room like total as reported by the platform.
    pub like_count: u64,

    /// Sum of likes seen in like events.
    pub total_likes: u64,

    /// Diamonds from settled gifts.
    pub diamond_count: u64,

    /// Settled gifts.
    pub gift_count: u64,

    pub chat_count: u64,
    pub follower_count: u64,
    pub share_count: u64,
    pub join_count: u64,

    /// When the current session went live.
    pub connected_since: Option<DateTime<Utc>>,

    /// Handle of the live session. `Some` only while connected.
    pub handle: Option<String>,
}

impl StreamStats {
    /// Zeroed stats bound to a live session.
    pub fn for_session(handle: &str, connected_since: DateTime<Utc>) -> Self {
        Self {
            connected_since: Some(connected_since),
            handle: Some(handle.to_string()),
            ..Self::default()
        }
    }

    /// Returns true if every counter is zero and no session is bound.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-call overrides for `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Timeout for each backend attempt, overriding settings.
    pub timeout_ms: Option<u64>,

    /// Overrides `fallback_enabled` for `auto` mode.
    pub fallback_enabled: Option<bool>,
}

impl ConnectOptions {
    /// Resolve the timeout against a configured default.
    pub fn timeout_or(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }
}

/// Everything the edge layer shows on its status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub stats: StreamStats,

    /// Version string of the backend in use; empty when no backend is.
    pub backend_version: String,
}
