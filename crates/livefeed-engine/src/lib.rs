//! Connection manager for livefeed.
//!
//! This crate selects and supervises a backend, folds its events into
//! session stats and fans everything out to subscribers.

mod broadcast;
mod handle;
mod orchestrator;
mod reconnect;
mod stats;

pub use broadcast::{Broadcaster, ChannelSubscriber, DeliveryError, Subscriber};
pub use handle::normalize_handle;
pub use orchestrator::ConnectionManager;
pub use reconnect::ReconnectPolicy;
pub use stats::{fold, is_counted, StatsAccumulator};
