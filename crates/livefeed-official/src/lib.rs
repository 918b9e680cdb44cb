//! Official connector backend.
//!
//! Wraps a third-party connector library behind [`LiveConnector`] and adapts
//! it to the [`livefeed_ipc::Backend`] contract.

mod adapter;
pub mod connector;

pub use adapter::OfficialBackend;
pub use connector::{ConnectorCallbacks, ConnectorError, LiveConnector, UnavailableConnector};
