//! # Invocation Dispatch
//!
//! The client and server drivers, and the [`Engine`] they share.
//!
//! ## Architecture
//!
//! ```text
//!        Client                                   Server
//!  proxy -> dispatch fn                     proxy -> dispatch fn (ConnectionId)
//!        -> Engine::prepare                       -> ConnectionMap::transport_of
//!        -> ClientTransport::send                 -> Engine::prepare
//!                                                 -> ServerTransport::send
//!  pump  -> Engine::receive                 serve -> ConnectionMap::connect
//!        -> reply                                 -> Engine::receive -> reply
//! ```
//!
//! ## States
//!
//! A client moves `Disconnected -> Connecting -> Connected -> Disconnected`.
//! Connecting never retries; the caller decides whether to call `start` again.

mod client;
mod connections;
mod engine;
mod error;
mod server;

pub use client::Client;
pub use client::ClientBuilder;
pub use connections::ConnectionMap;
pub use engine::Engine;
pub use error::ConnectionError;
pub use error::DispatchError;
pub use error::InboundError;
pub use server::Server;
pub use server::ServerBuilder;
