//! # Proxies
//!
//! A proxy implements a service interface by forwarding every call to a dispatch
//! function instead of running any logic itself. `#[culvert::service]` emits one
//! forwarding type per interface, generic over the metadata it carries, so the
//! client-to-server and server-to-client directions share one proxy and differ only
//! in the dispatch function and metadata supplied.
//!
//! ## Architecture
//!
//! ```text
//! proxy.method(args)
//!   -> Invocation { service shape, method index, erased args }
//!   -> dispatch(invocation, metadata)          // client or server driver
//!   -> Completion                              // awaited by the proxy
//! ```

use std::any::Any;
use std::sync::Arc;

use qualname::TypeDescriptor;

use crate::callback::Completion;
use crate::ids::ConnectionId;
use crate::method;
use crate::method::MethodShape;
use crate::method::MethodTable;
use crate::method::ServiceShape;
use crate::outcome::CallError;
use crate::serialiser;
use crate::serialiser::Serialiser;
use crate::wire::WireType;

/// A trait that can be named on the wire and resolved from a provider.
///
/// Implemented for `dyn Trait` by `#[culvert::service]` and `#[culvert::interface]`.
pub trait Interface: 'static {
    fn descriptor() -> TypeDescriptor;
    fn interface_name() -> &'static str;
}

/// Converts a concrete implementation into the interface object.
pub trait Upcast<T>: Interface {
    fn upcast(this: Arc<T>) -> Arc<Self>;
}

/// A remotely invokable interface.
pub trait Service: Interface {
    fn shape() -> &'static ServiceShape;
    fn method_table() -> method::Result<MethodTable<Self>>;
    fn proxy<M: Metadata>(dispatch: Dispatch<M>, metadata: M) -> Arc<Self>;
}

/// Whatever a proxy carries to tell its dispatch function where the call goes.
pub trait Metadata: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Metadata for T {}

/// Metadata of client proxies. There is only one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientToServer;

/// Metadata of server proxies: the logical connection to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerToClient {
    pub connection: ConnectionId,
}

pub type Dispatch<M> = Arc<dyn Fn(Invocation, M) -> Result<Completion, CallError> + Send + Sync>;

/// A packaged call: which method, and its arguments.
pub struct Invocation {
    pub service: &'static ServiceShape,
    pub method: usize,
    pub arguments: Vec<Argument>,
}

impl Invocation {
    pub fn new(service: &'static ServiceShape, method: usize, arguments: Vec<Argument>) -> Self {
        Self { service, method, arguments }
    }

    pub fn shape(&self) -> Option<&'static MethodShape> {
        self.service.method(self.method)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let method = self.shape().map(|m| m.name).unwrap_or("?");
        write!(f, "{}.{}({} args)", self.service.name, method, self.arguments.len())
    }
}

trait ErasedArgument: Send {
    fn encode(&self, serialiser: &Serialiser) -> serialiser::Result<Vec<u8>>;
    fn descriptor(&self) -> TypeDescriptor;
    fn as_any(&self) -> &dyn Any;
}

impl<T: WireType> ErasedArgument for T {
    fn encode(&self, serialiser: &Serialiser) -> serialiser::Result<Vec<u8>> {
        serialiser.serialise(self)
    }

    fn descriptor(&self) -> TypeDescriptor {
        T::descriptor()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One argument of an invocation, not yet serialised.
pub struct Argument(Box<dyn ErasedArgument>);

impl Argument {
    pub fn new<T: WireType>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn encode(&self, serialiser: &Serialiser) -> serialiser::Result<Vec<u8>> {
        self.0.encode(serialiser)
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.0.descriptor()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}
