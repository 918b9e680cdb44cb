//! Typed state, events and backend contract for livefeed.
//!
//! This crate defines the types shared between the backends, the connection
//! manager and the subscribers attached to it.

mod backend;
mod config;
mod error;
mod events;
mod state;
mod types;

pub use backend::{notice_channel, Backend, BackendNotice, NoticeReceiver, NoticeSender};
pub use config::{
    apply_env_overrides, parse_bool, parse_u64_range, OfficialSettings, RawSettings,
    ReconnectSettings, Settings, SettingsError, MIN_HEARTBEAT_INTERVAL_MS,
};
pub use error::ConnectError;
pub use events::{
    ChatEvent, DomainEvent, GiftEvent, LikeEvent, MemberEvent, OutboundEvent, QuestionEvent,
    RoomUserEvent, SocialEvent, StreamEndEvent, SubscribeEvent, ToastLevel, UserInfo,
    CONTROL_ACTION_STREAM_ENDED, CONTROL_ACTION_STREAM_SUSPENDED, STREAKABLE_GIFT_TYPE,
};
pub use state::{BackendKind, ConnectMode, ConnectionState, ConnectionStatus};
pub use types::{ConnectOptions, ConnectionInfo, StreamStats};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for a subscriber's outbound queue.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// A named event as delivered to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberMessage {
    /// Event name, e.g. `chat` or `connectionState`.
    pub event: String,

    /// JSON payload.
    pub payload: serde_json::Value,
}

/// Creates a bounded subscriber channel.
pub fn subscriber_channel() -> (Sender<SubscriberMessage>, Receiver<SubscriberMessage>) {
    crossbeam_channel::bounded(SUBSCRIBER_CHANNEL_CAPACITY)
}
