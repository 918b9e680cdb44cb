//! [`Backend`] implementation over a [`LiveConnector`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use livefeed_ipc::{
    Backend, BackendKind, BackendNotice, ChatEvent, ConnectError, ConnectOptions, DomainEvent,
    GiftEvent, LikeEvent, MemberEvent, NoticeSender, QuestionEvent, RoomUserEvent, SocialEvent,
    StreamEndEvent, SubscribeEvent, UserInfo, CONTROL_ACTION_STREAM_ENDED,
};

use crate::connector::{
    ChatData, ConnectorCallbacks, DisconnectData, FollowData, GiftData, LibraryUser, LikeData,
    LiveConnector, MemberData, QuestionData, RoomUserData, ShareData, StreamEndData,
    SubscribeData,
};

/// Everything a connector can report, as one type.
#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    Chat(ChatData),
    Gift(GiftData),
    Like(LikeData),
    Member(MemberData),
    Follow(FollowData),
    Share(ShareData),
    Subscribe(SubscribeData),
    Question(QuestionData),
    RoomUser(RoomUserData),
    StreamEnd(StreamEndData),
    Disconnected(DisconnectData),
}

fn user(u: LibraryUser) -> UserInfo {
    UserInfo {
        user_id: u.user_id,
        unique_id: u.unique_id,
        nickname: u.nickname,
        profile_picture_url: u.profile_picture_url,
    }
}

/// Map library data to a domain event. `None` for in-progress gift streaks.
fn to_domain(inbound: Inbound) -> Option<DomainEvent> {
    let event = match inbound {
        Inbound::Chat(d) => DomainEvent::Chat(ChatEvent {
            user: user(d.user),
            comment: d.comment,
        }),
        Inbound::Gift(d) => {
            let gift = GiftEvent {
                user: user(d.user),
                gift_id: d.gift_id,
                gift_name: d.gift_name,
                diamond_value: d.diamond_count,
                repeat_count: d.repeat_count,
                repeat_is_final: d.repeat_end,
                gift_type: d.gift_type,
            };
            if gift.is_pending_streak() {
                return None;
            }
            DomainEvent::Gift(gift)
        }
        Inbound::Like(d) => DomainEvent::Like(LikeEvent {
            user: user(d.user),
            like_count: d.like_count,
            total_like_count: d.total_like_count,
        }),
        Inbound::Member(d) => DomainEvent::Member(MemberEvent { user: user(d.user) }),
        Inbound::Follow(d) => DomainEvent::Follow(SocialEvent { user: user(d.user) }),
        Inbound::Share(d) => DomainEvent::Share(SocialEvent { user: user(d.user) }),
        Inbound::Subscribe(d) => DomainEvent::Subscribe(SubscribeEvent {
            user: user(d.user),
            sub_month: d.sub_month,
        }),
        Inbound::Question(d) => DomainEvent::Question(QuestionEvent {
            user: user(d.user),
            question: d.question,
        }),
        Inbound::RoomUser(d) => DomainEvent::RoomUser(RoomUserEvent {
            viewer_count: d.viewer_count,
        }),
        Inbound::StreamEnd(d) => DomainEvent::StreamEnd(StreamEndEvent {
            action: d.action.unwrap_or(CONTROL_ACTION_STREAM_ENDED),
        }),
        Inbound::Disconnected(_) => return None,
    };

    Some(event)
}

/// Per-connection sink all callbacks funnel into.
struct Dispatch {
    session: u64,
    current: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    notices: NoticeSender,
}

impl Dispatch {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.session
    }

    fn handle(&self, inbound: Inbound) {
        if !self.is_current() {
            return;
        }

        match inbound {
            Inbound::Disconnected(d) => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    info!(reason = %d.reason, "Official connector disconnected");
                    let _ = self.notices.send(BackendNotice::Disconnected { reason: d.reason });
                }
            }
            Inbound::StreamEnd(d) => {
                let was_connected = self.connected.swap(false, Ordering::SeqCst);
                if let Some(event) = to_domain(Inbound::StreamEnd(d)) {
                    let _ = self.notices.send(BackendNotice::Event(event));
                }
                if was_connected {
                    info!("Official connector reported stream end");
                    let _ = self.notices.send(BackendNotice::StreamEnded);
                }
            }
            other => {
                if let Some(event) = to_domain(other) {
                    let _ = self.notices.send(BackendNotice::Event(event));
                }
            }
        }
    }
}

fn register(dispatch: Arc<Dispatch>) -> ConnectorCallbacks {
    macro_rules! route {
        ($variant:ident) => {{
            let dispatch = Arc::clone(&dispatch);
            move |data| dispatch.handle(Inbound::$variant(data))
        }};
    }

    ConnectorCallbacks::new()
        .on_chat(route!(Chat))
        .on_gift(route!(Gift))
        .on_like(route!(Like))
        .on_member(route!(Member))
        .on_follow(route!(Follow))
        .on_share(route!(Share))
        .on_subscribe(route!(Subscribe))
        .on_question(route!(Question))
        .on_room_user(route!(RoomUser))
        .on_stream_end(route!(StreamEnd))
        .on_disconnected(route!(Disconnected))
}

/// Backend that delegates to an official connector library.
pub struct OfficialBackend {
    connector: Arc<dyn LiveConnector>,
    default_timeout_ms: u64,
    session: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
}

impl OfficialBackend {
    /// Wrap a connector. `default_timeout_ms` applies when the caller gives none.
    pub fn new(connector: Arc<dyn LiveConnector>, default_timeout_ms: u64) -> Self {
        Self {
            connector,
            default_timeout_ms,
            session: Arc::new(AtomicU64::new(0)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Backend for OfficialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Official
    }

    fn version(&self) -> String {
        self.connector.version()
    }

    #[instrument(name = "official_connect", skip(self, options, cancel, notices))]
    async fn connect(
        &self,
        handle: &str,
        options: &ConnectOptions,
        cancel: CancellationToken,
        notices: NoticeSender,
    ) -> Result<DateTime<Utc>, ConnectError> {
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);

        let callbacks = register(Arc::new(Dispatch {
            session,
            current: Arc::clone(&self.session),
            connected: Arc::clone(&self.connected),
            notices,
        }));

        let timeout = options.timeout_or(self.default_timeout_ms);
        debug!(timeout_ms = timeout.as_millis() as u64, "Connecting official connector");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = tokio::time::timeout(timeout, self.connector.connect(handle, callbacks)) => {
                match result {
                    Err(_) => Err(ConnectError::BackendUnavailable(format!(
                        "official connector did not connect within {}ms",
                        timeout.as_millis()
                    ))),
                    Ok(Err(e)) => Err(ConnectError::BackendUnavailable(e.to_string())),
                    Ok(Ok(())) => Ok(()),
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(version = %self.connector.version(), "Official connector connected");
                Ok(Utc::now())
            }
            Err(e) => {
                // Retire this session's callbacks and release whatever the library holds.
                self.session.fetch_add(1, Ordering::SeqCst);
                self.connector.disconnect().await;
                if !matches!(e, ConnectError::Cancelled) {
                    warn!("Official connect failed: {}", e);
                }
                Err(e)
            }
        }
    }

    #[instrument(name = "official_disconnect", skip(self))]
    async fn disconnect(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.connector.disconnect().await;
        if was_connected {
            info!("Official connector closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use livefeed_ipc::{notice_channel, NoticeReceiver};
    use parking_lot::Mutex;

    use crate::connector::{ConnectorError, UnavailableConnector};

    /// Connector double that keeps the registered callbacks so tests can drive them.
    #[derive(Default)]
    struct MockConnector {
        callbacks: Mutex<Option<ConnectorCallbacks>>,
        delay: Option<Duration>,
        reject: Option<ConnectorError>,
        disconnects: AtomicU64,
    }

    impl MockConnector {
        fn with<R>(&self, f: impl FnOnce(&ConnectorCallbacks) -> R) -> R {
            let guard = self.callbacks.lock();
            f(guard.as_ref().unwrap())
        }
    }

    #[async_trait]
    impl LiveConnector for MockConnector {
        fn version(&self) -> String {
            "mock/1.0".to_string()
        }

        async fn connect(&self, _unique_id: &str, callbacks: ConnectorCallbacks) -> Result<(), ConnectorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.reject {
                return Err(err.clone());
            }
            *self.callbacks.lock() = Some(callbacks);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn connected(mock: Arc<MockConnector>) -> (OfficialBackend, NoticeReceiver) {
        let backend = OfficialBackend::new(mock, 1_000);
        let (tx, rx) = notice_channel();
        backend
            .connect("someone", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();
        (backend, rx)
    }

    fn alice() -> LibraryUser {
        LibraryUser {
            user_id: "1".into(),
            unique_id: "alice".into(),
            nickname: "Alice".into(),
            profile_picture_url: None,
        }
    }

    #[tokio::test]
    async fn test_callbacks_map_to_domain_events() {
        let mock = Arc::new(MockConnector::default());
        let (backend, mut rx) = connected(Arc::clone(&mock)).await;
        assert!(backend.is_connected());
        assert_eq!(backend.version(), "mock/1.0");

        mock.with(|cb| {
            cb.emit_chat(ChatData {
                user: alice(),
                comment: "hello".into(),
            });
            cb.emit_follow(FollowData { user: alice() });
            cb.emit_room_user(RoomUserData { viewer_count: 12 });
        });

        match rx.try_recv().unwrap() {
            BackendNotice::Event(DomainEvent::Chat(chat)) => {
                assert_eq!(chat.comment, "hello");
                assert_eq!(chat.user.unique_id, "alice");
            }
            other => panic!("unexpected notice: {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            BackendNotice::Event(DomainEvent::Follow(_))
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendNotice::Event(DomainEvent::RoomUser(RoomUserEvent { viewer_count: 12 }))
        );
    }

    #[tokio::test]
    async fn test_pending_streak_gift_is_suppressed() {
        let mock = Arc::new(MockConnector::default());
        let (_backend, mut rx) = connected(Arc::clone(&mock)).await;

        mock.with(|cb| {
            cb.emit_gift(GiftData {
                gift_type: 1,
                repeat_count: 4,
                repeat_end: false,
                diamond_count: 1,
                ..GiftData::default()
            });
            cb.emit_gift(GiftData {
                gift_type: 1,
                repeat_count: 5,
                repeat_end: true,
                diamond_count: 1,
                ..GiftData::default()
            });
        });

        match rx.try_recv().unwrap() {
            BackendNotice::Event(DomainEvent::Gift(gift)) => assert_eq!(gift.repeat_count, 5),
            other => panic!("unexpected notice: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_library_disconnect_raises_notice_once() {
        let mock = Arc::new(MockConnector::default());
        let (backend, mut rx) = connected(Arc::clone(&mock)).await;

        mock.with(|cb| {
            cb.emit_disconnected(DisconnectData {
                reason: "socket closed".into(),
            });
            cb.emit_disconnected(DisconnectData {
                reason: "again".into(),
            });
        });

        assert!(!backend.is_connected());
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendNotice::Disconnected {
                reason: "socket closed".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_end_raises_event_then_notice() {
        let mock = Arc::new(MockConnector::default());
        let (backend, mut rx) = connected(Arc::clone(&mock)).await;

        mock.with(|cb| cb.emit_stream_end(StreamEndData::default()));

        assert!(!backend.is_connected());
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendNotice::Event(DomainEvent::StreamEnd(StreamEndEvent { action: 3 }))
        );
        assert_eq!(rx.try_recv().unwrap(), BackendNotice::StreamEnded);
    }

    #[tokio::test]
    async fn test_callbacks_after_disconnect_are_dropped() {
        let mock = Arc::new(MockConnector::default());
        let (backend, mut rx) = connected(Arc::clone(&mock)).await;

        backend.disconnect().await;
        backend.disconnect().await;
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 2);

        mock.with(|cb| cb.emit_chat(ChatData::default()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_backend_unavailable() {
        let mock = Arc::new(MockConnector {
            delay: Some(Duration::from_secs(60)),
            ..MockConnector::default()
        });
        let backend = OfficialBackend::new(mock.clone(), 15_000);
        let (tx, _rx) = notice_channel();

        let options = ConnectOptions {
            timeout_ms: Some(500),
            ..ConnectOptions::default()
        };
        let err = backend
            .connect("someone", &options, CancellationToken::new(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectError::BackendUnavailable(msg) if msg.contains("500ms")));
        assert!(!backend.is_connected());
        assert_eq!(mock.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_backend_unavailable() {
        let backend = OfficialBackend::new(Arc::new(UnavailableConnector), 1_000);
        let (tx, _rx) = notice_channel();

        let err = backend
            .connect("someone", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_connect() {
        let mock = Arc::new(MockConnector {
            delay: Some(Duration::from_secs(60)),
            ..MockConnector::default()
        });
        let backend = OfficialBackend::new(mock, 120_000);
        let (tx, _rx) = notice_channel();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = backend
            .connect("someone", &ConnectOptions::default(), cancel, tx)
            .await
            .unwrap_err();
        assert_eq!(err, ConnectError::Cancelled);
        assert!(!backend.is_connected());
    }
}
