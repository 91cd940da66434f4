//! # Transport Abstraction
//!
//! The external duplex channel, reduced to what the drivers need.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: transports move opaque frames. They know nothing about
//!   invocations, callbacks or types.
//! - **Hub-Shaped Server**: the server side sees many connections, each named by an
//!   ephemeral [`TransportId`], and reports their lifecycle as events.

use crate::ids::TransportId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The channel closed underneath the caller.
    ConnectionLost(String),
    /// An operation that needs a connection ran without one.
    NotConnected,
    /// No live connection has this id.
    UnknownConnection(TransportId),
    /// Any other failure reported by the underlying channel.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::NotConnected => write!(f, "not connected"),
            Self::UnknownConnection(id) => write!(f, "unknown connection {}", id),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The client end of a duplex channel (`Arc<dyn ClientTransport>`).
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Performs the handshake. Does not retry.
    async fn connect(&self) -> Result<()>;

    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// The next inbound frame, or `None` once the channel is closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// The transport's current view of the connection. Polled for liveness.
    fn state(&self) -> ConnectionState;

    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(TransportId),
    Message(TransportId, Vec<u8>),
    Disconnected(TransportId),
}

/// The server end: many connections multiplexed behind one hub.
#[async_trait::async_trait]
pub trait ServerTransport: Send + Sync + 'static {
    async fn send(&self, connection: &TransportId, payload: &[u8]) -> Result<()>;

    /// The next lifecycle or message event, or `None` once the hub is shut down.
    async fn next_event(&self) -> Option<ConnectionEvent>;
}
