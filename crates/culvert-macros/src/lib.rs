//! Code generation for culvert service interfaces.
//!
//! # Example
//!
//! ```ignore
//! #[culvert::service(module = "demo", version = "1.0.0")]
//! pub trait Greeter {
//!     async fn greet(&self, name: String) -> anyhow::Result<String>;
//!     async fn ping(&self) -> anyhow::Result<()>;
//! }
//!
//! // Generated:
//! // - the trait, with `Send + Sync` supertraits, under `async_trait`
//! // - `Interface` and `Upcast<T>` for `dyn Greeter`
//! // - `GreeterProxy<M>`, forwarding every method to a dispatch function
//! // - `Service` for `dyn Greeter`: its shape, method table and proxy constructor
//! ```
//!
//! Implementations are written with `#[culvert::async_trait]`.

use proc_macro::TokenStream;

mod expand;
mod parse;

/// Marks a trait as a remotely invokable service.
///
/// Arguments, all optional: `name`, `module`, `version`, `culture`, `key_token`.
/// The wire name defaults to the trait name and the module to the declaring package.
#[proc_macro_attribute]
pub fn service(attr: TokenStream, item: TokenStream) -> TokenStream {
    let parsed = parse::parse(attr.into(), item.into(), true);
    match parsed.map(|service| expand::service(&service)) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

/// Marks a trait as a local interface: resolvable from a provider, never invoked remotely.
#[proc_macro_attribute]
pub fn interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    let parsed = parse::parse(attr.into(), item.into(), false);
    match parsed.map(|interface| expand::interface(&interface)) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
