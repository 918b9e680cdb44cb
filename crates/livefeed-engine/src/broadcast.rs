//! Event fan-out to subscribers.

use std::sync::{Arc, Weak};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use livefeed_ipc::{OutboundEvent, SubscriberMessage};

/// Why a subscriber could not take an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's queue is full.
    #[error("subscriber queue is full")]
    Full,

    /// The subscriber went away.
    #[error("subscriber is closed")]
    Closed,
}

/// A sink for named events. An error means "remove me".
pub trait Subscriber: Send + Sync {
    fn deliver(&self, event: &str, payload: &Value) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded crossbeam channel.
pub struct ChannelSubscriber {
    sender: Sender<SubscriberMessage>,
}

impl ChannelSubscriber {
    pub fn new(sender: Sender<SubscriberMessage>) -> Self {
        Self { sender }
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, event: &str, payload: &Value) -> Result<(), DeliveryError> {
        let message = SubscriberMessage {
            event: event.to_string(),
            payload: payload.clone(),
        };

        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

/// Fans events out to weakly held subscribers.
///
/// The broadcaster never keeps a subscriber alive. Dropped subscribers and
/// subscribers whose delivery fails are removed on the next send.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<Vec<Weak<dyn Subscriber>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn add<S: Subscriber + 'static>(&self, subscriber: &Arc<S>) {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        self.subscribers.write().push(weak);
    }

    /// Unregister a subscriber. Unknown subscribers are ignored.
    pub fn remove<S: Subscriber + 'static>(&self, subscriber: &Arc<S>) {
        let target = Arc::as_ptr(subscriber);
        self.subscribers
            .write()
            .retain(|weak| !std::ptr::addr_eq(weak.as_ptr(), target));
    }

    /// Number of registered subscribers, dead ones included until the next send.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Send an outbound event to every subscriber.
    pub fn send(&self, event: &OutboundEvent) {
        self.broadcast(event.name(), &event.payload());
    }

    /// Send a named payload to every subscriber.
    pub fn broadcast(&self, event: &str, payload: &Value) {
        let mut failed: Vec<Weak<dyn Subscriber>> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for weak in subscribers.iter() {
                let Some(subscriber) = weak.upgrade() else {
                    failed.push(weak.clone());
                    continue;
                };
                if let Err(e) = subscriber.deliver(event, payload) {
                    warn!(event, error = %e, "dropping subscriber");
                    failed.push(weak.clone());
                }
            }
            debug!(event, recipients = subscribers.len() - failed.len(), "broadcast event");
        }

        if failed.is_empty() {
            return;
        }

        self.prune(&failed);
    }

    /// Drop the given subscribers and any dead ones. Matches by identity, since
    /// the list may have changed since delivery.
    fn prune(&self, failed: &[Weak<dyn Subscriber>]) {
        self.subscribers.write().retain(|weak| {
            weak.strong_count() > 0 && !failed.iter().any(|dead| Weak::ptr_eq(dead, weak))
        });
    }
}
