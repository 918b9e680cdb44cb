//! Connection phase tracking for the raw client.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Phase of the raw protocol client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawPhase {
    /// Never connected.
    #[default]
    Idle,

    /// Fetching the room page.
    ResolvingRoom,

    /// Opening the push socket.
    Connecting,

    /// Receiving frames.
    Connected,

    /// Session ended, either by teardown or by the remote side.
    Disconnected,

    /// The last attempt failed.
    Failed { reason: String },
}

impl RawPhase {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transient state (resolving or connecting).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ResolvingRoom | Self::Connecting)
    }

    /// Check if failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Get status message for logs.
    pub fn message(&self) -> String {
        match self {
            Self::Idle => "Idle".to_string(),
            Self::ResolvingRoom => "Resolving room...".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Disconnected => "Disconnected".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

/// Move `phase` to `next`, logging the change.
pub(crate) fn advance(phase: &mut RawPhase, next: RawPhase) {
    if *phase == next {
        return;
    }
    debug!(from = %phase.message(), to = %next.message(), "Raw phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_predicates() {
        assert!(RawPhase::Connected.is_connected());
        assert!(RawPhase::ResolvingRoom.is_transient());
        assert!(RawPhase::Connecting.is_transient());
        assert!(!RawPhase::Disconnected.is_transient());
        assert!(RawPhase::Failed {
            reason: "x".into()
        }
        .is_failed());
    }

    #[test]
    fn test_phase_message() {
        let phase = RawPhase::Failed {
            reason: "room not found".into(),
        };
        assert_eq!(phase.message(), "Failed: room not found");
    }

    #[test]
    fn test_advance() {
        let mut phase = RawPhase::Idle;
        advance(&mut phase, RawPhase::ResolvingRoom);
        assert!(phase.is_transient());
        advance(&mut phase, RawPhase::Connected);
        assert!(phase.is_connected());
    }
}
