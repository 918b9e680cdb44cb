//! Typed domain events and the named events broadcast to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ConnectionState;
use crate::types::StreamStats;

/// Gift type the platform reports as a streak (combo) gift.
pub const STREAKABLE_GIFT_TYPE: u32 = 1;

/// Control action: the broadcaster ended the stream.
pub const CONTROL_ACTION_STREAM_ENDED: u32 = 3;

/// Control action: the platform suspended the stream.
pub const CONTROL_ACTION_STREAM_SUSPENDED: u32 = 4;

/// Normalized user attached to most events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Numeric platform id, as a string.
    pub user_id: String,

    /// Handle (`@name`) without the marker.
    pub unique_id: String,

    /// Display name.
    pub nickname: String,

    /// Avatar URL, if any.
    pub profile_picture_url: Option<String>,
}

/// A chat comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub user: UserInfo,
    pub comment: String,
}

/// A gift, possibly part of a streak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub user: UserInfo,
    pub gift_id: u64,
    pub gift_name: String,

    /// Diamond value of one unit of this gift.
    pub diamond_value: u64,

    /// How many units this event settles.
    pub repeat_count: u64,

    /// Whether a streak has concluded. Always true for non-streak gifts.
    pub repeat_is_final: bool,

    /// Platform gift type; [`STREAKABLE_GIFT_TYPE`] marks combo gifts.
    pub gift_type: u32,
}

impl GiftEvent {
    /// A streak gift whose combo is still running. These are not settled.
    pub fn is_pending_streak(&self) -> bool {
        self.gift_type == STREAKABLE_GIFT_TYPE && !self.repeat_is_final
    }

    /// Total diamonds this event is worth.
    pub fn total_diamonds(&self) -> u64 {
        self.diamond_value.saturating_mul(self.repeat_count)
    }
}

impl Default for GiftEvent {
    fn default() -> Self {
        Self {
            user: UserInfo::default(),
            gift_id: 0,
            gift_name: String::new(),
            diamond_value: 0,
            repeat_count: 1,
            repeat_is_final: true,
            gift_type: 0,
        }
    }
}

/// Likes sent by a viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEvent {
    pub user: UserInfo,

    /// Likes in this event.
    pub like_count: u64,

    /// Running total for the room as reported by the platform.
    pub total_like_count: Option<u64>,
}

/// A viewer joined the room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub user: UserInfo,
}

/// A viewer followed or shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialEvent {
    pub user: UserInfo,
}

/// A viewer subscribed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEvent {
    pub user: UserInfo,
    pub sub_month: u32,
}

/// A question posted through the Q&A panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEvent {
    pub user: UserInfo,
    pub question: String,
}

/// Current viewer count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUserEvent {
    pub viewer_count: u64,
}

/// A control message about the stream lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndEvent {
    pub action: u32,
}

impl StreamEndEvent {
    /// Whether the action code means the broadcast is really over.
    pub fn is_genuine_end(&self) -> bool {
        matches!(
            self.action,
            CONTROL_ACTION_STREAM_ENDED | CONTROL_ACTION_STREAM_SUSPENDED
        )
    }
}

/// Closed set of events a backend can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    Chat(ChatEvent),
    Gift(GiftEvent),
    Like(LikeEvent),
    Member(MemberEvent),
    Follow(SocialEvent),
    Share(SocialEvent),
    Subscribe(SubscribeEvent),
    Question(QuestionEvent),
    RoomUser(RoomUserEvent),
    StreamEnd(StreamEndEvent),
}

impl DomainEvent {
    /// Broadcast event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Gift(_) => "gift",
            Self::Like(_) => "like",
            Self::Member(_) => "member",
            Self::Follow(_) => "follow",
            Self::Share(_) => "share",
            Self::Subscribe(_) => "subscribe",
            Self::Question(_) => "question",
            Self::RoomUser(_) => "roomUser",
            Self::StreamEnd(_) => "streamEnd",
        }
    }

    /// The user attached to the event, if the variant has one.
    pub fn user(&self) -> Option<&UserInfo> {
        match self {
            Self::Chat(e) => Some(&e.user),
            Self::Gift(e) => Some(&e.user),
            Self::Like(e) => Some(&e.user),
            Self::Member(e) => Some(&e.user),
            Self::Follow(e) | Self::Share(e) => Some(&e.user),
            Self::Subscribe(e) => Some(&e.user),
            Self::Question(e) => Some(&e.user),
            Self::RoomUser(_) | Self::StreamEnd(_) => None,
        }
    }
}

/// Severity of a toast notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// Named events fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Full state after a transition.
    ConnectionState(ConnectionState),

    /// A session went live.
    Connected { handle: String, method: String },

    /// A session ended.
    Disconnected { handle: String, method: String },

    /// One decoded event from the active backend.
    Domain(DomainEvent),

    /// Counters after a counted event.
    Stats(StreamStats),

    /// Informational notice for the UI.
    Toast { level: ToastLevel, message: String },

    /// Error text for the UI. Never a raw error object.
    Error { message: String },
}

impl OutboundEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionState(_) => "connectionState",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Domain(event) => event.name(),
            Self::Stats(_) => "stats",
            Self::Toast { .. } => "toast",
            Self::Error { .. } => "error",
        }
    }

    /// JSON payload for the event.
    pub fn payload(&self) -> Value {
        let result = match self {
            Self::ConnectionState(state) => serde_json::to_value(state),
            Self::Connected { handle, method } | Self::Disconnected { handle, method } => {
                Ok(serde_json::json!({ "handle": handle, "method": method }))
            }
            Self::Domain(event) => serde_json::to_value(event),
            Self::Stats(stats) => serde_json::to_value(stats),
            Self::Toast { level, message } => {
                Ok(serde_json::json!({ "level": level, "message": message }))
            }
            Self::Error { message } => Ok(serde_json::json!({ "message": message })),
        };

        result.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_streak() {
        let gift = GiftEvent {
            gift_type: STREAKABLE_GIFT_TYPE,
            repeat_is_final: false,
            ..GiftEvent::default()
        };
        assert!(gift.is_pending_streak());

        let settled = GiftEvent {
            repeat_is_final: true,
            ..gift.clone()
        };
        assert!(!settled.is_pending_streak());

        let plain = GiftEvent {
            gift_type: 2,
            ..gift
        };
        assert!(!plain.is_pending_streak());
    }

    #[test]
    fn test_stream_end_actions() {
        assert!(StreamEndEvent { action: 3 }.is_genuine_end());
        assert!(StreamEndEvent { action: 4 }.is_genuine_end());
        assert!(!StreamEndEvent { action: 1 }.is_genuine_end());
    }

    #[test]
    fn test_outbound_names_follow_domain_variant() {
        let event = OutboundEvent::Domain(DomainEvent::RoomUser(RoomUserEvent { viewer_count: 7 }));
        assert_eq!(event.name(), "roomUser");
        assert_eq!(event.payload()["viewerCount"], 7);
        assert_eq!(event.payload()["type"], "roomUser");
    }

    #[test]
    fn test_connected_payload_shape() {
        let event = OutboundEvent::Connected {
            handle: "someone".into(),
            method: "raw".into(),
        };
        assert_eq!(event.name(), "connected");
        assert_eq!(event.payload(), serde_json::json!({ "handle": "someone", "method": "raw" }));
    }
}
