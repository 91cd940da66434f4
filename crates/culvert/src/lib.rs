//! # Culvert
//!
//! A bidirectional RPC runtime. A client and a server, joined by a duplex transport,
//! call service interfaces on each other as if they were local.
//!
//! ## Architecture
//!
//! - [`qualname`] names types on the wire; the [`registry`] resolves those names under
//!   an allow-list and the [`serialiser`] refuses payloads outside it.
//! - `#[culvert::service]` generates a proxy and a method table per interface.
//! - The [`dispatch`] drivers turn proxy calls into frames, run inbound invocations,
//!   and complete pending calls through the [`callback`] registry.
//! - [`provider`]s decide which instance serves a call.
//!
//! ```ignore
//! #[culvert::service]
//! pub trait Greeter {
//!     async fn greet(&self, name: String) -> anyhow::Result<String>;
//! }
//!
//! let client = ClientBuilder::new(transport).build()?;
//! client.start().await?;
//! let greeting = client.server_service::<dyn Greeter>().greet("ada".into()).await?;
//! ```

extern crate self as culvert;

pub mod callback;
pub mod cleanup;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod ids;
pub mod memory;
pub mod method;
pub mod outcome;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod serialiser;
pub mod transport;
pub mod wire;

pub use culvert_macros::interface;
pub use culvert_macros::service;

pub use anyhow;
pub use async_trait::async_trait;
pub use futures::future::BoxFuture;
pub use qualname::ModuleIdentity;
pub use qualname::TypeDescriptor;

pub use config::Config;
pub use dispatch::Client;
pub use dispatch::ClientBuilder;
pub use dispatch::Server;
pub use dispatch::ServerBuilder;
pub use ids::ConnectionId;
pub use ids::CorrelationId;
pub use outcome::CallError;
pub use outcome::RemoteFault;
pub use provider::Construct;
pub use provider::Implementation;
pub use provider::ServiceContext;
pub use provider::ServiceList;
pub use registry::TypeList;
pub use wire::WireType;

#[cfg(test)]
mod tests;
