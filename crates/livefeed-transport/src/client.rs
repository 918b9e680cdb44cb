//! Raw protocol backend: room page lookup followed by a push session.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use livefeed_ipc::{
    Backend, BackendKind, ConnectError, ConnectOptions, NoticeSender, RawSettings,
};

use crate::connection::{self, RawPhase};
use crate::error::TransportError;
use crate::room::RoomResolver;
use crate::session::{self, SessionHandle};
use crate::TransportResult;

/// Backend speaking the undocumented push protocol directly.
///
/// It never reconnects by itself. When the socket drops it reports
/// `Disconnected` on the notice channel and leaves retrying to the caller.
pub struct RawBackend {
    settings: RawSettings,
    resolver: RoomResolver,
    phase: Arc<RwLock<RawPhase>>,
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    attempt: Mutex<Option<CancellationToken>>,
    room_id: RwLock<Option<String>>,
}

impl RawBackend {
    /// Create a raw backend from settings.
    pub fn new(settings: RawSettings) -> TransportResult<Self> {
        let resolver = RoomResolver::new(&settings)?;

        Ok(Self {
            settings,
            resolver,
            phase: Arc::new(RwLock::new(RawPhase::Idle)),
            session: tokio::sync::Mutex::new(None),
            attempt: Mutex::new(None),
            room_id: RwLock::new(None),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> RawPhase {
        self.phase.read().clone()
    }

    /// Room id of the current or last session.
    pub fn room_id(&self) -> Option<String> {
        self.room_id.read().clone()
    }

    async fn open_session(
        &self,
        handle: &str,
        options: &ConnectOptions,
        cancel: &CancellationToken,
        notices: NoticeSender,
    ) -> TransportResult<()> {
        if self.phase.read().is_connected() {
            return Err(TransportError::AlreadyConnected);
        }

        connection::advance(&mut self.phase.write(), RawPhase::ResolvingRoom);
        let room_id = self.resolver.resolve(handle, cancel).await?;
        *self.room_id.write() = Some(room_id.clone());

        connection::advance(&mut self.phase.write(), RawPhase::Connecting);
        let url = session::push_url(&self.settings.push_url, &room_id)?;
        let timeout = options.timeout_or(self.settings.open_timeout_ms);
        let socket = session::open(&url, &self.settings.user_agent, timeout, cancel).await?;

        let mut slot = self.session.lock().await;
        // A teardown may have landed while the socket was opening.
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        connection::advance(&mut self.phase.write(), RawPhase::Connected);
        *slot = Some(session::spawn(
            socket,
            self.settings.heartbeat_interval(),
            notices,
            Arc::clone(&self.phase),
        ));

        info!(%room_id, "Push session established");
        Ok(())
    }
}

#[async_trait]
impl Backend for RawBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Raw
    }

    fn version(&self) -> String {
        format!("raw-protocol/{}", env!("CARGO_PKG_VERSION"))
    }

    #[instrument(name = "raw_connect", skip(self, options, cancel, notices))]
    async fn connect(
        &self,
        handle: &str,
        options: &ConnectOptions,
        cancel: CancellationToken,
        notices: NoticeSender,
    ) -> Result<DateTime<Utc>, ConnectError> {
        let attempt = cancel.child_token();
        *self.attempt.lock() = Some(attempt.clone());

        let result = self.open_session(handle, options, &attempt, notices).await;

        match result {
            Ok(()) => Ok(Utc::now()),
            Err(TransportError::Cancelled) => {
                debug!("Raw connect cancelled");
                connection::advance(&mut self.phase.write(), RawPhase::Idle);
                Err(ConnectError::Cancelled)
            }
            Err(e) => {
                warn!("Raw connect failed: {}", e);
                connection::advance(
                    &mut self.phase.write(),
                    RawPhase::Failed {
                        reason: e.to_string(),
                    },
                );
                Err(e.into())
            }
        }
    }

    #[instrument(name = "raw_disconnect", skip(self))]
    async fn disconnect(&self) {
        if self.phase.read().is_transient() {
            debug!("Cancelling in-flight raw connect");
        }
        if let Some(attempt) = self.attempt.lock().take() {
            attempt.cancel();
        }

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.shutdown().await;
            info!("Push session closed");
        }

        let mut phase = self.phase.write();
        if !matches!(*phase, RawPhase::Idle) {
            connection::advance(&mut phase, RawPhase::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.phase.read().is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use livefeed_ipc::{notice_channel, BackendNotice, DomainEvent, NoticeReceiver};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::protocol::Message;
    use tokio_tungstenite::WebSocketStream;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Start a one-shot push server running `script` against the first client.
    async fn push_server<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });

        format!("ws://{addr}/webcast/im/push/v2/")
    }

    /// Drain client frames until the client goes away.
    async fn hold_open(mut ws: WebSocketStream<TcpStream>) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    async fn room_page(room_id: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@streamer/live"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"<script>{{"roomId":"{room_id}"}}</script>"#)),
            )
            .mount(&server)
            .await;
        server
    }

    fn backend(page: &MockServer, push: String) -> RawBackend {
        RawBackend::new(RawSettings {
            room_page_url: format!("{}/@{{handle}}/live", page.uri()),
            push_url: push,
            heartbeat_interval_ms: 50,
            ..RawSettings::default()
        })
        .unwrap()
    }

    async fn next_notice(rx: &mut NoticeReceiver) -> BackendNotice {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notice in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_connect_receives_chat() {
        let page = room_page("7301").await;
        let push = push_server(|mut ws| async move {
            ws.send(Message::text(r#"{"type":"chat","uniqueId":"alice","comment":"hi"}"#))
                .await
                .unwrap();
            hold_open(ws).await;
        })
        .await;

        let raw = backend(&page, push);
        let (tx, mut rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        assert!(raw.is_connected());
        assert_eq!(raw.room_id().as_deref(), Some("7301"));

        match next_notice(&mut rx).await {
            BackendNotice::Event(DomainEvent::Chat(chat)) => {
                assert_eq!(chat.comment, "hi");
                assert_eq!(chat.user.unique_id, "alice");
            }
            other => panic!("unexpected notice: {other:?}"),
        }

        raw.disconnect().await;
        assert!(!raw.is_connected());
        assert_eq!(raw.phase(), RawPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_offline_room_is_room_not_found() {
        let page = room_page("0").await;
        let raw = backend(&page, "ws://127.0.0.1:9/".to_string());
        let (tx, _rx) = notice_channel();

        let err = raw
            .connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectError::RoomNotFound(_)));
        assert!(raw.phase().is_failed());
    }

    #[tokio::test]
    async fn test_remote_close_reports_disconnected() {
        let page = room_page("7302").await;
        let push = push_server(|mut ws| async move {
            let _ = ws.close(None).await;
        })
        .await;

        let raw = backend(&page, push);
        let (tx, mut rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        assert!(matches!(
            next_notice(&mut rx).await,
            BackendNotice::Disconnected { .. }
        ));
        assert!(!raw.is_connected());
    }

    #[tokio::test]
    async fn test_stream_end_control_message() {
        let page = room_page("7303").await;
        let push = push_server(|mut ws| async move {
            ws.send(Message::text(r#"{"type":"WebcastControlMessage","action":3}"#))
                .await
                .unwrap();
            hold_open(ws).await;
        })
        .await;

        let raw = backend(&page, push);
        let (tx, mut rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        assert!(matches!(
            next_notice(&mut rx).await,
            BackendNotice::Event(DomainEvent::StreamEnd(_))
        ));
        assert_eq!(next_notice(&mut rx).await, BackendNotice::StreamEnded);
        assert!(!raw.is_connected());
    }

    #[tokio::test]
    async fn test_heartbeat_is_sent() {
        let page = room_page("7304").await;
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let push = push_server(|mut ws| async move {
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Binary(data) = frame {
                    let _ = seen_tx.send(data.to_vec());
                    break;
                }
            }
            hold_open(ws).await;
        })
        .await;

        let raw = backend(&page, push);
        let (tx, _rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), seen_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, session::HEARTBEAT_FRAME);

        raw.disconnect().await;
    }

    #[tokio::test]
    async fn test_zero_heartbeat_interval_keeps_session_alive() {
        let page = room_page("7307").await;
        let push = push_server(|mut ws| async move {
            ws.send(Message::text(r#"{"type":"chat","comment":"still here"}"#))
                .await
                .unwrap();
            hold_open(ws).await;
        })
        .await;

        let raw = RawBackend::new(RawSettings {
            room_page_url: format!("{}/@{{handle}}/live", page.uri()),
            push_url: push,
            heartbeat_interval_ms: 0,
            ..RawSettings::default()
        })
        .unwrap();
        let (tx, mut rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        assert!(matches!(
            next_notice(&mut rx).await,
            BackendNotice::Event(DomainEvent::Chat(_))
        ));
        assert!(raw.is_connected());

        raw.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_silent() {
        let page = room_page("7305").await;
        let push = push_server(hold_open).await;

        let raw = backend(&page, push);
        let (tx, mut rx) = notice_channel();
        raw.connect("streamer", &ConnectOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();

        raw.disconnect().await;
        raw.disconnect().await;
        assert!(!raw.is_connected());

        // A local teardown produces no terminal notice.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_connect_never_goes_live() {
        let page = room_page("7306").await;
        let raw = backend(&page, "ws://127.0.0.1:9/".to_string());
        let (tx, _rx) = notice_channel();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = raw
            .connect("streamer", &ConnectOptions::default(), cancel, tx)
            .await
            .unwrap_err();
        assert_eq!(err, ConnectError::Cancelled);
        assert_eq!(raw.phase(), RawPhase::Idle);
    }
}
