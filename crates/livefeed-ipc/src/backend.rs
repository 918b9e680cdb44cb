//! Contract between the connection manager and its backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;
use crate::events::DomainEvent;
use crate::state::BackendKind;
use crate::types::ConnectOptions;

/// Something a live backend reports after `connect` returned.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendNotice {
    /// A decoded event.
    Event(DomainEvent),

    /// The transport went away. The backend will not reconnect by itself.
    Disconnected { reason: String },

    /// The broadcast is over.
    StreamEnded,
}

/// Sending half of a backend's notice channel.
pub type NoticeSender = mpsc::UnboundedSender<BackendNotice>;

/// Receiving half of a backend's notice channel.
pub type NoticeReceiver = mpsc::UnboundedReceiver<BackendNotice>;

/// Create a notice channel for one connect attempt.
pub fn notice_channel() -> (NoticeSender, NoticeReceiver) {
    mpsc::unbounded_channel()
}

/// One way of obtaining the live event stream.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Version string reported in connection info.
    fn version(&self) -> String;

    /// Open a session for an already-normalized handle.
    ///
    /// Returns when the session is live. Events and terminal notices arrive
    /// on `notices` afterwards. Implementations check `cancel` before each
    /// network step and return [`ConnectError::Cancelled`] once it fires.
    async fn connect(
        &self,
        handle: &str,
        options: &ConnectOptions,
        cancel: CancellationToken,
        notices: NoticeSender,
    ) -> Result<DateTime<Utc>, ConnectError>;

    /// Tear down the session. Idempotent and infallible.
    async fn disconnect(&self);

    /// Whether the backend currently holds a live session.
    fn is_connected(&self) -> bool;
}
