//! Client side of courier: one [`ConnectionManager`] per session owning the
//! push link, and one [`SyncClient`] per open channel view keeping an
//! ordered, gap-free copy of that channel's history.
//!
//! ```text
//!   HttpApi ──fetch_page──▶ SyncClient ◀──pushes── ConnectionManager ◀── Transport
//!                           (MessageLog)    state ─┘                     (WsTransport)
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod sync;
pub mod ws;

pub use config::ClientConfig;
pub use connection::{ConnectionManager, ConnectionState, Push, PushSubscription, Transport, TransportLink};
pub use error::ClientError;
pub use http::{Draft, HttpApi};
pub use sync::{HistorySource, MessageLog, SyncClient, SyncConfig};
pub use ws::WsTransport;
