//! Session counters.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use livefeed_ipc::{DomainEvent, StreamStats};

/// Apply one event to a stats value.
///
/// All arithmetic saturates. Gifts still inside a streak are not counted;
/// their final event carries the whole streak.
pub fn fold(mut stats: StreamStats, event: &DomainEvent) -> StreamStats {
    match event {
        DomainEvent::Chat(_) => {
            stats.chat_count = stats.chat_count.saturating_add(1);
        }
        DomainEvent::Gift(gift) => {
            if !gift.is_pending_streak() {
                stats.gift_count = stats.gift_count.saturating_add(1);
                stats.diamond_count = stats.diamond_count.saturating_add(gift.total_diamonds());
            }
        }
        DomainEvent::Like(like) => {
            stats.total_likes = stats.total_likes.saturating_add(like.like_count);
            let reported = like.total_like_count.unwrap_or(stats.total_likes);
            stats.like_count = stats.like_count.max(reported);
        }
        DomainEvent::Member(_) => {
            stats.join_count = stats.join_count.saturating_add(1);
        }
        DomainEvent::Follow(_) => {
            stats.follower_count = stats.follower_count.saturating_add(1);
        }
        DomainEvent::Share(_) => {
            stats.share_count = stats.share_count.saturating_add(1);
        }
        DomainEvent::RoomUser(room) => {
            stats.viewer_count = room.viewer_count;
        }
        DomainEvent::Subscribe(_) | DomainEvent::Question(_) | DomainEvent::StreamEnd(_) => {}
    }

    stats
}

/// Whether `fold` can change any counter for this event.
pub fn is_counted(event: &DomainEvent) -> bool {
    match event {
        DomainEvent::Gift(gift) => !gift.is_pending_streak(),
        DomainEvent::Subscribe(_) | DomainEvent::Question(_) | DomainEvent::StreamEnd(_) => false,
        _ => true,
    }
}

/// Thread-safe holder for the current session's stats.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    stats: RwLock<StreamStats>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the counters and bind them to a new live session.
    pub fn begin(&self, handle: &str, since: DateTime<Utc>) {
        *self.stats.write() = StreamStats::for_session(handle, since);
    }

    /// Unbind the session while keeping the counters, for a reconnect window.
    pub fn suspend(&self) {
        let mut stats = self.stats.write();
        stats.handle = None;
        stats.connected_since = None;
    }

    /// Rebind the counters to a re-established session.
    pub fn resume(&self, handle: &str, since: DateTime<Utc>) {
        let mut stats = self.stats.write();
        stats.handle = Some(handle.to_string());
        stats.connected_since = Some(since);
    }

    /// Fold an event in and return the updated stats.
    pub fn record(&self, event: &DomainEvent) -> StreamStats {
        let mut stats = self.stats.write();
        *stats = fold(std::mem::take(&mut *stats), event);
        stats.clone()
    }

    /// Copy of the current stats.
    pub fn snapshot(&self) -> StreamStats {
        self.stats.read().clone()
    }

    /// Zero everything, including the session binding.
    pub fn reset(&self) {
        debug!("Resetting stats");
        *self.stats.write() = StreamStats::default();
    }
}
