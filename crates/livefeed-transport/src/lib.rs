//! Raw protocol client.
//!
//! This crate resolves a handle to its live room over HTTP, holds the push
//! WebSocket open with a heartbeat, and decodes inbound frames into
//! [`livefeed_ipc::DomainEvent`]s.

mod client;
mod connection;
pub mod decoder;
mod error;
mod room;
mod session;

pub use client::RawBackend;
pub use connection::RawPhase;
pub use decoder::{decode, decode_binary, decode_frame, DecodeIgnorable};
pub use error::TransportError;
pub use room::{extract_room_id, RoomResolver};
pub use session::{push_url, HEARTBEAT_FRAME};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
