//! Boundary to an official connector library.
//!
//! A connector library hands events to a fixed set of typed callbacks that
//! are registered once per connection. Nothing here depends on a specific
//! library; an implementation wraps one behind [`LiveConnector`].

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a connector library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// No library is linked or it cannot be used in this environment.
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    /// The library refused the connection (sign-in, rate limit, ...).
    #[error("connector rejected the connection: {0}")]
    Rejected(String),

    /// The account is not live.
    #[error("user is offline: {0}")]
    Offline(String),
}

/// User as the library reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryUser {
    pub user_id: String,
    pub unique_id: String,
    pub nickname: String,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatData {
    pub user: LibraryUser,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftData {
    pub user: LibraryUser,
    pub gift_id: u64,
    pub gift_name: String,
    pub diamond_count: u64,
    pub repeat_count: u64,
    pub repeat_end: bool,
    pub gift_type: u32,
}

impl Default for GiftData {
    fn default() -> Self {
        Self {
            user: LibraryUser::default(),
            gift_id: 0,
            gift_name: String::new(),
            diamond_count: 0,
            repeat_count: 1,
            repeat_end: true,
            gift_type: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeData {
    pub user: LibraryUser,
    pub like_count: u64,
    pub total_like_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberData {
    pub user: LibraryUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowData {
    pub user: LibraryUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareData {
    pub user: LibraryUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeData {
    pub user: LibraryUser,
    pub sub_month: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionData {
    pub user: LibraryUser,
    pub question: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomUserData {
    pub viewer_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEndData {
    /// Control action, when the library exposes it.
    pub action: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectData {
    pub reason: String,
}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// The callbacks a connector invokes for one connection.
#[derive(Default)]
pub struct ConnectorCallbacks {
    on_chat: Option<Callback<ChatData>>,
    on_gift: Option<Callback<GiftData>>,
    on_like: Option<Callback<LikeData>>,
    on_member: Option<Callback<MemberData>>,
    on_follow: Option<Callback<FollowData>>,
    on_share: Option<Callback<ShareData>>,
    on_subscribe: Option<Callback<SubscribeData>>,
    on_question: Option<Callback<QuestionData>>,
    on_room_user: Option<Callback<RoomUserData>>,
    on_stream_end: Option<Callback<StreamEndData>>,
    on_disconnected: Option<Callback<DisconnectData>>,
}

macro_rules! callback {
    ($register:ident, $emit:ident, $field:ident, $data:ty) => {
        pub fn $register(mut self, f: impl Fn($data) + Send + Sync + 'static) -> Self {
            self.$field = Some(Box::new(f));
            self
        }

        pub fn $emit(&self, data: $data) {
            if let Some(f) = &self.$field {
                f(data);
            }
        }
    };
}

impl ConnectorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    callback!(on_chat, emit_chat, on_chat, ChatData);
    callback!(on_gift, emit_gift, on_gift, GiftData);
    callback!(on_like, emit_like, on_like, LikeData);
    callback!(on_member, emit_member, on_member, MemberData);
    callback!(on_follow, emit_follow, on_follow, FollowData);
    callback!(on_share, emit_share, on_share, ShareData);
    callback!(on_subscribe, emit_subscribe, on_subscribe, SubscribeData);
    callback!(on_question, emit_question, on_question, QuestionData);
    callback!(on_room_user, emit_room_user, on_room_user, RoomUserData);
    callback!(on_stream_end, emit_stream_end, on_stream_end, StreamEndData);
    callback!(on_disconnected, emit_disconnected, on_disconnected, DisconnectData);
}

/// An official connector library.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Library name and version.
    fn version(&self) -> String;

    /// Connect to `unique_id`'s live room and start invoking `callbacks`.
    ///
    /// Returns once the library considers the connection established.
    async fn connect(
        &self,
        unique_id: &str,
        callbacks: ConnectorCallbacks,
    ) -> Result<(), ConnectorError>;

    /// Close the connection and drop the callbacks. Must be idempotent.
    async fn disconnect(&self);
}

/// Connector used when no library is linked. Always rejects.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

#[async_trait]
impl LiveConnector for UnavailableConnector {
    fn version(&self) -> String {
        "unavailable".to_string()
    }

    async fn connect(&self, _unique_id: &str, _callbacks: ConnectorCallbacks) -> Result<(), ConnectorError> {
        Err(ConnectorError::Unavailable(
            "no official connector library is configured".to_string(),
        ))
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unregistered_callbacks_are_noops() {
        let callbacks = ConnectorCallbacks::new();
        callbacks.emit_chat(ChatData::default());
        callbacks.emit_disconnected(DisconnectData::default());
    }

    #[test]
    fn test_registered_callback_fires() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let callbacks = ConnectorCallbacks::new().on_room_user(move |data| {
            counter.store(data.viewer_count, Ordering::SeqCst);
        });

        callbacks.emit_room_user(RoomUserData { viewer_count: 77 });
        assert_eq!(seen.load(Ordering::SeqCst), 77);
    }

    #[tokio::test]
    async fn test_unavailable_connector_rejects() {
        let err = UnavailableConnector
            .connect("someone", ConnectorCallbacks::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Unavailable(_)));
    }
}
