//! Push-endpoint WebSocket session.
//!
//! One task owns the socket. It multiplexes the heartbeat timer, inbound
//! frames and the stop token, so stopping the task stops both heartbeat and
//! reader at once and nothing touches the socket after it is closed.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use livefeed_ipc::{BackendNotice, DomainEvent, NoticeSender};

use crate::connection::{self, RawPhase};
use crate::decoder;
use crate::error::TransportError;
use crate::TransportResult;

/// Keep-alive frame the push endpoint expects (`hb` in a length-prefixed field).
pub const HEARTBEAT_FRAME: &[u8] = &[0x3a, 0x02, 0x68, 0x62];

pub(crate) type PushSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the push URL for a resolved room.
pub fn push_url(base: &str, room_id: &str) -> TransportResult<Url> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("room_id", room_id);
    Ok(url)
}

/// Open the push socket.
///
/// Fails with `Timeout` if the upgrade does not finish within `timeout`. If
/// `cancel` fires first the pending handshake, or an already-open socket, is
/// dropped.
pub(crate) async fn open(
    url: &Url,
    user_agent: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TransportResult<PushSocket> {
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }

    let mut request = url.as_str().into_client_request()?;
    match HeaderValue::from_str(user_agent) {
        Ok(value) => {
            request.headers_mut().insert(header::USER_AGENT, value);
        }
        Err(_) => warn!("User-Agent is not a valid header value, sending without it"),
    }

    debug!(%url, "Opening push socket");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)) => {
            match result {
                Err(_) => Err(TransportError::Timeout(format!(
                    "push socket did not open within {}ms",
                    timeout.as_millis()
                ))),
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok((socket, _response))) => Ok(socket),
            }
        }
    }
}

/// A running session task.
pub(crate) struct SessionHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Stop heartbeat and reader, close the socket and wait for the task.
    pub(crate) async fn shutdown(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!("Push session task ended abnormally: {}", e);
        }
    }
}

/// Why the session loop ended.
enum SessionEnd {
    /// Torn down locally; the caller already knows.
    Stopped,

    /// The remote side or the network closed the socket.
    Closed(String),

    /// A genuine stream-end control message arrived.
    StreamEnded,
}

/// Spawn the session task for an open socket.
pub(crate) fn spawn(
    socket: PushSocket,
    heartbeat_interval: Duration,
    notices: NoticeSender,
    phase: Arc<RwLock<RawPhase>>,
) -> SessionHandle {
    let stop = CancellationToken::new();
    let task = tokio::spawn(run_session(
        socket,
        heartbeat_interval,
        notices,
        phase,
        stop.clone(),
    ));

    SessionHandle { stop, task }
}

/// Reports the end of a session exactly once. If the task unwinds before
/// reporting, dropping it still marks the phase and sends `Disconnected`.
struct EndReport {
    notices: NoticeSender,
    phase: Arc<RwLock<RawPhase>>,
    done: bool,
}

impl EndReport {
    fn new(notices: NoticeSender, phase: Arc<RwLock<RawPhase>>) -> Self {
        Self {
            notices,
            phase,
            done: false,
        }
    }

    fn send(&self, notice: BackendNotice) {
        let _ = self.notices.send(notice);
    }

    /// Local stop; the caller owns the phase and expects no notice.
    fn stopped(mut self) {
        self.done = true;
    }

    fn terminal(mut self, notice: BackendNotice) {
        self.done = true;
        connection::advance(&mut self.phase.write(), RawPhase::Disconnected);
        let _ = self.notices.send(notice);
    }
}

impl Drop for EndReport {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        warn!("Push session task ended without reporting");
        connection::advance(&mut self.phase.write(), RawPhase::Disconnected);
        let _ = self.notices.send(BackendNotice::Disconnected {
            reason: "push session task aborted".to_string(),
        });
    }
}

async fn run_session(
    socket: PushSocket,
    heartbeat_interval: Duration,
    notices: NoticeSender,
    phase: Arc<RwLock<RawPhase>>,
    stop: CancellationToken,
) {
    let report = EndReport::new(notices, phase);
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    heartbeat.tick().await;

    let mut frames: u64 = 0;

    let end = loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break SessionEnd::Stopped,

            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Binary(Bytes::from_static(HEARTBEAT_FRAME))).await {
                    warn!("Heartbeat send failed: {}", e);
                } else {
                    trace!("Heartbeat sent");
                }
            }

            frame = stream.next() => {
                let events = match frame {
                    None => break SessionEnd::Closed("push socket closed".to_string()),
                    Some(Err(e)) => break SessionEnd::Closed(format!("push socket error: {e}")),
                    Some(Ok(Message::Text(text))) => decoder::decode_frame(text.as_str()),
                    Some(Ok(Message::Binary(data))) => decoder::decode_binary(&data),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!(
                                "push socket closed by remote ({} {})",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => "push socket closed by remote".to_string(),
                        };
                        break SessionEnd::Closed(reason);
                    }
                    Some(Ok(_)) => continue,
                };

                frames += 1;
                if dispatch(&report, events) {
                    break SessionEnd::StreamEnded;
                }
            }
        }
    };

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;

    match end {
        SessionEnd::Stopped => {
            debug!(frames, "Push session stopped");
            report.stopped();
        }
        SessionEnd::Closed(reason) => {
            info!(frames, %reason, "Push session lost");
            report.terminal(BackendNotice::Disconnected { reason });
        }
        SessionEnd::StreamEnded => {
            info!(frames, "Stream ended by broadcaster");
            report.terminal(BackendNotice::StreamEnded);
        }
    }
}

/// Forward decoded events. Returns true if one of them ends the stream.
fn dispatch(report: &EndReport, events: Vec<DomainEvent>) -> bool {
    let mut ended = false;

    for event in events {
        if let DomainEvent::StreamEnd(end) = &event {
            ended |= end.is_genuine_end();
        }
        report.send(BackendNotice::Event(event));
    }

    ended
}
