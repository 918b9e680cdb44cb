//! Connection manager.
//!
//! Owns the single live session: picks a backend, falls back, publishes
//! state, folds events into stats and is the only place that retries a
//! dropped session. Every connect attempt gets a generation number and a
//! cancellation token; notices and state updates from an older generation are
//! discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use livefeed_ipc::{
    notice_channel, Backend, BackendKind, BackendNotice, ConnectError, ConnectMode,
    ConnectOptions, ConnectionInfo, ConnectionState, DomainEvent, NoticeReceiver, OutboundEvent,
    Settings, StreamStats, ToastLevel,
};

use crate::broadcast::Broadcaster;
use crate::handle::normalize_handle;
use crate::reconnect::ReconnectPolicy;
use crate::stats::{self, StatsAccumulator};

/// What the current session is trying to reach.
#[derive(Debug, Clone)]
struct Target {
    handle: String,
    mode: ConnectMode,
    options: ConnectOptions,
}

/// A backend that just went live.
struct Live {
    backend: Arc<dyn Backend>,
    since: DateTime<Utc>,
    fallback_used: bool,
    notices: NoticeReceiver,
    toast: Option<String>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    cancel: CancellationToken,
    target: Option<Target>,
    active: Option<Arc<dyn Backend>>,
}

impl Session {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.cancel.is_cancelled()
    }

    /// Invalidate the running attempt, its pump and any pending backoff.
    fn retire(&mut self) {
        self.cancel.cancel();
        self.generation += 1;
    }
}

enum CloseCause {
    StreamEnded,
    Lost(String),
}

struct Inner {
    settings: Settings,
    policy: ReconnectPolicy,
    official: Arc<dyn Backend>,
    raw: Arc<dyn Backend>,
    broadcaster: Arc<Broadcaster>,
    stats: StatsAccumulator,
    state: RwLock<Arc<ConnectionState>>,
    session: Mutex<Session>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// Establishes and supervises the live session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager over the two backends.
    pub fn new(
        settings: Settings,
        official: Arc<dyn Backend>,
        raw: Arc<dyn Backend>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let policy = ReconnectPolicy::from(&settings.reconnect);

        Self {
            inner: Arc::new(Inner {
                settings,
                policy,
                official,
                raw,
                broadcaster,
                stats: StatsAccumulator::new(),
                state: RwLock::new(Arc::new(ConnectionState::disconnected())),
                session: Mutex::new(Session::default()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Connect to `handle`.
    ///
    /// `mode` defaults to the configured mode. Any existing session is torn
    /// down first. Fails with [`ConnectError::AlreadyConnecting`] if another
    /// connect is in flight, without disturbing it.
    #[instrument(name = "manager_connect", skip(self, options))]
    pub async fn connect(
        &self,
        handle: &str,
        mode: Option<ConnectMode>,
        options: ConnectOptions,
    ) -> Result<(), ConnectError> {
        let Ok(_guard) = self.inner.connect_lock.try_lock() else {
            warn!("Connect rejected, another attempt is in flight");
            return Err(ConnectError::AlreadyConnecting);
        };

        let handle = match normalize_handle(handle) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}", e);
                self.inner.broadcaster.send(&OutboundEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let mode = mode.unwrap_or(self.inner.settings.default_mode);
        info!(%handle, %mode, "Connecting");

        self.inner.teardown().await;

        let target = Target {
            handle,
            mode,
            options,
        };
        let (generation, cancel) = self.inner.begin_attempt(&target);

        match self.inner.establish(generation, &target, &cancel).await {
            Ok(live) => {
                let backend = Arc::clone(&live.backend);
                if self.inner.install(generation, &target, live, true) {
                    Ok(())
                } else {
                    debug!("Session superseded while connecting");
                    backend.disconnect().await;
                    Err(ConnectError::Cancelled)
                }
            }
            Err(ConnectError::Cancelled) => {
                info!("Connect cancelled");
                Err(ConnectError::Cancelled)
            }
            Err(e) => {
                error!("Connect failed: {}", e);
                self.inner.fail(generation, e.to_string());
                Err(e)
            }
        }
    }

    /// Tear down the session, cancelling any attempt or pending reconnect.
    ///
    /// Never fails. A no-op when already disconnected.
    #[instrument(name = "manager_disconnect", skip(self))]
    pub async fn disconnect(&self) {
        let active = {
            let mut session = self.inner.session.lock();
            let previous = self.inner.snapshot();
            if previous.is_disconnected() && session.target.is_none() && session.active.is_none() {
                debug!("Already disconnected, ignoring disconnect");
                return;
            }

            session.retire();
            session.target = None;
            self.inner.stats.reset();
            self.inner.set_state(ConnectionState::disconnected());
            self.inner.announce_disconnected(&previous);
            session.active.take()
        };

        if let Some(backend) = active {
            backend.disconnect().await;
        }

        info!("Disconnected");
    }

    /// Copy of the current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot().as_ref().clone()
    }

    /// Copy of the current stats.
    pub fn stats(&self) -> StreamStats {
        self.inner.stats.snapshot()
    }

    /// State, stats and the version of the backend in use.
    pub fn connection_info(&self) -> ConnectionInfo {
        let state = self.state();
        let backend_version = self
            .inner
            .backend(state.backend_kind)
            .map(|backend| backend.version())
            .unwrap_or_default();

        ConnectionInfo {
            state,
            stats: self.stats(),
            backend_version,
        }
    }

    /// Whether either backend reports a live session.
    pub fn is_connected(&self) -> bool {
        self.inner.official.is_connected() || self.inner.raw.is_connected()
    }

    /// The broadcaster events are published on.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.inner.broadcaster
    }
}

impl Inner {
    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn Backend>> {
        match kind {
            BackendKind::Official => Some(&self.official),
            BackendKind::Raw => Some(&self.raw),
            BackendKind::None => None,
        }
    }

    fn snapshot(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state.read())
    }

    /// Replace the state and broadcast it. Callers hold the session lock.
    fn set_state(&self, state: ConnectionState) {
        debug!(status = state.name(), backend = %state.backend_kind, "State transition");
        *self.state.write() = Arc::new(state.clone());
        self.broadcaster.send(&OutboundEvent::ConnectionState(state));
    }

    fn announce_disconnected(&self, previous: &ConnectionState) {
        if !previous.is_connected() {
            return;
        }
        if let Some(handle) = &previous.target_handle {
            self.broadcaster.send(&OutboundEvent::Disconnected {
                handle: handle.clone(),
                method: previous.backend_kind.name().to_string(),
            });
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().is_current(generation)
    }

    /// Drop whatever session exists before a new connect.
    async fn teardown(&self) {
        let active = {
            let mut session = self.session.lock();
            let previous = self.snapshot();
            session.retire();
            session.target = None;
            self.announce_disconnected(&previous);
            session.active.take()
        };

        if let Some(backend) = active {
            backend.disconnect().await;
            info!(backend = %backend.kind(), "Previous session torn down");
        }
        self.stats.reset();
    }

    fn begin_attempt(&self, target: &Target) -> (u64, CancellationToken) {
        let kind = match target.mode {
            ConnectMode::Raw => BackendKind::Raw,
            ConnectMode::Official | ConnectMode::Auto => BackendKind::Official,
        };

        let mut session = self.session.lock();
        session.generation += 1;
        session.cancel = CancellationToken::new();
        session.target = Some(target.clone());
        session.active = None;
        self.set_state(ConnectionState::connecting(&target.handle, kind));

        (session.generation, session.cancel.clone())
    }

    /// Publish `connecting` for `kind` unless that is already the state.
    fn publish_connecting(&self, generation: u64, handle: &str, kind: BackendKind) -> bool {
        let session = self.session.lock();
        if !session.is_current(generation) {
            return false;
        }

        let current = self.snapshot();
        if !(current.is_connecting() && current.backend_kind == kind) {
            self.set_state(ConnectionState::connecting(handle, kind));
        }
        true
    }

    /// Run the target's mode against the backends.
    async fn establish(
        &self,
        generation: u64,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Live, ConnectError> {
        match target.mode {
            ConnectMode::Official => self.attempt(generation, &self.official, target, cancel).await,
            ConnectMode::Raw => self.attempt(generation, &self.raw, target, cancel).await,
            ConnectMode::Auto => {
                let official = match self.attempt(generation, &self.official, target, cancel).await {
                    Ok(live) => return Ok(live),
                    Err(ConnectError::Cancelled) => return Err(ConnectError::Cancelled),
                    Err(e) => e,
                };

                let fallback = target
                    .options
                    .fallback_enabled
                    .unwrap_or(self.settings.fallback_enabled);
                if !fallback {
                    info!(error = %official, "Official backend failed and fallback is disabled");
                    return Err(ConnectError::AllBackendsFailed {
                        official: Box::new(official),
                        raw: None,
                    });
                }

                warn!(error = %official, "Official backend failed, falling back to raw");
                match self.attempt(generation, &self.raw, target, cancel).await {
                    Ok(mut live) => {
                        live.fallback_used = true;
                        live.toast = Some(format!(
                            "Official backend unavailable ({official}); connected via raw fallback"
                        ));
                        Ok(live)
                    }
                    Err(ConnectError::Cancelled) => Err(ConnectError::Cancelled),
                    Err(raw) => Err(ConnectError::AllBackendsFailed {
                        official: Box::new(official),
                        raw: Some(Box::new(raw)),
                    }),
                }
            }
        }
    }

    async fn attempt(
        &self,
        generation: u64,
        backend: &Arc<dyn Backend>,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Live, ConnectError> {
        if !self.publish_connecting(generation, &target.handle, backend.kind()) {
            return Err(ConnectError::Cancelled);
        }

        let (tx, notices) = notice_channel();
        let since = backend
            .connect(&target.handle, &target.options, cancel.child_token(), tx)
            .await?;

        Ok(Live {
            backend: Arc::clone(backend),
            since,
            fallback_used: false,
            notices,
            toast: None,
        })
    }

    /// Make `live` the active session and start its pump.
    ///
    /// Returns false if the attempt was superseded; the caller then owns
    /// tearing the backend down.
    fn install(self: &Arc<Self>, generation: u64, target: &Target, live: Live, fresh_stats: bool) -> bool {
        let Live {
            backend,
            since,
            fallback_used,
            notices,
            toast,
        } = live;
        let kind = backend.kind();

        let cancel = {
            let mut session = self.session.lock();
            if !session.is_current(generation) {
                return false;
            }

            session.active = Some(backend);
            if fresh_stats {
                self.stats.begin(&target.handle, since);
            } else {
                self.stats.resume(&target.handle, since);
            }
            self.set_state(ConnectionState::connected(
                &target.handle,
                kind,
                since,
                fallback_used,
            ));
            self.broadcaster.send(&OutboundEvent::Connected {
                handle: target.handle.clone(),
                method: kind.name().to_string(),
            });
            if let Some(message) = toast {
                self.broadcaster.send(&OutboundEvent::Toast {
                    level: ToastLevel::Warning,
                    message,
                });
            }
            session.cancel.clone()
        };

        info!(handle = %target.handle, backend = %kind, fallback_used, "Connected");
        tokio::spawn(Arc::clone(self).pump(generation, cancel, notices));
        true
    }

    /// Record a failed attempt. Ignored if the attempt was superseded.
    fn fail(&self, generation: u64, reason: String) {
        let mut session = self.session.lock();
        if !session.is_current(generation) {
            return;
        }

        let handle = session.target.take().map(|target| target.handle);
        session.active = None;
        let kind = self.snapshot().backend_kind;
        self.stats.reset();
        self.set_state(ConnectionState::failed(handle.as_deref(), kind, reason.clone()));
        self.broadcaster.send(&OutboundEvent::Error { message: reason });
    }

    /// Serialize one attempt's notices onto manager state.
    async fn pump(self: Arc<Self>, generation: u64, cancel: CancellationToken, mut notices: NoticeReceiver) {
        loop {
            let notice = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                notice = notices.recv() => notice,
            };

            let Some(notice) = notice else {
                debug!(generation, "Notice channel closed");
                return;
            };

            match notice {
                BackendNotice::Event(event) => self.on_event(generation, event),
                BackendNotice::StreamEnded => {
                    self.close(generation, CloseCause::StreamEnded).await;
                    return;
                }
                BackendNotice::Disconnected { reason } => {
                    warn!(%reason, "Session lost");
                    if self.policy.should_retry(0) {
                        self.reconnect(generation, reason).await;
                    } else {
                        self.close(generation, CloseCause::Lost(reason)).await;
                    }
                    return;
                }
            }
        }
    }

    fn on_event(&self, generation: u64, event: DomainEvent) {
        let session = self.session.lock();
        if !session.is_current(generation) {
            return;
        }

        trace!(
            event = event.name(),
            user = event.user().map_or("", |user| user.unique_id.as_str()),
            "Event"
        );
        let stats = stats::is_counted(&event).then(|| self.stats.record(&event));
        self.broadcaster.send(&OutboundEvent::Domain(event));
        if let Some(stats) = stats {
            self.broadcaster.send(&OutboundEvent::Stats(stats));
        }
    }

    /// End the session without retrying.
    async fn close(&self, generation: u64, cause: CloseCause) {
        let active = {
            let mut session = self.session.lock();
            if !session.is_current(generation) {
                return;
            }

            let previous = self.snapshot();
            session.retire();
            session.target = None;
            self.stats.reset();
            self.set_state(ConnectionState::disconnected());
            self.announce_disconnected(&previous);

            match &cause {
                CloseCause::StreamEnded => info!("Stream ended, session closed"),
                CloseCause::Lost(reason) => {
                    let handle = previous.target_handle.as_deref().unwrap_or_default();
                    self.broadcaster.send(&OutboundEvent::Toast {
                        level: ToastLevel::Warning,
                        message: format!("Connection to @{handle} lost: {reason}"),
                    });
                }
            }
            session.active.take()
        };

        if let Some(backend) = active {
            backend.disconnect().await;
        }
    }

    /// Re-run the target with backoff after the transport dropped.
    async fn reconnect(self: &Arc<Self>, generation: u64, reason: String) {
        let (target, previous, next, cancel) = {
            let mut session = self.session.lock();
            if !session.is_current(generation) {
                return;
            }
            let Some(target) = session.target.clone() else {
                return;
            };

            session.generation += 1;
            let kind = self.snapshot().backend_kind;
            self.stats.suspend();
            self.set_state(ConnectionState::connecting(&target.handle, kind));
            self.broadcaster.send(&OutboundEvent::Toast {
                level: ToastLevel::Warning,
                message: format!("Connection to @{} lost ({reason}); reconnecting", target.handle),
            });

            (target, session.active.take(), session.generation, session.cancel.clone())
        };

        if let Some(backend) = previous {
            backend.disconnect().await;
        }

        let mut attempt = 0;
        let mut last_error = reason;

        while self.policy.should_retry(attempt) {
            attempt += 1;
            let delay = self.policy.delay_for_attempt(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let Ok(_guard) = self.connect_lock.try_lock() else {
                debug!("Connect in flight, abandoning reconnect");
                return;
            };
            if !self.is_current(next) {
                return;
            }

            match self.establish(next, &target, &cancel).await {
                Ok(live) => {
                    let backend = Arc::clone(&live.backend);
                    if !self.install(next, &target, live, false) {
                        backend.disconnect().await;
                    }
                    return;
                }
                Err(ConnectError::Cancelled) => return,
                Err(e) => {
                    warn!(attempt, "Reconnect attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        error!(attempt, "Giving up on reconnect");
        self.fail(next, format!("reconnect failed after {attempt} attempts: {last_error}"));
    }
}
