//! # Service Providers
//!
//! Decide which instance handles a call for a given interface and connection.
//!
//! - The client provider is process-scoped: one cached instance per implementation,
//!   one cached proxy per server interface.
//! - The server provider is connection-scoped: every resolution constructs a fresh
//!   instance bound to the calling connection, and client proxies are addressed by
//!   logical connection id.
//!
//! Implementations are built through [`Construct`], which receives a
//! [`ServiceContext`] for constructor injection.

use std::any::Any;
use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use qualname::ModuleIdentity;
use qualname::TypeDescriptor;

use crate::dispatch::ConnectionMap;
use crate::ids::ConnectionId;
use crate::method;
use crate::method::ErasedService;
use crate::method::InterfaceBinding;
use crate::proxy::ClientToServer;
use crate::proxy::Dispatch;
use crate::proxy::Interface;
use crate::proxy::ServerToClient;
use crate::proxy::Service;
use crate::proxy::Upcast;
use crate::registry::Purpose;
use crate::registry::TypeRegistry;

#[derive(Debug)]
pub enum Error {
    NoImplementation { interfaces: Vec<&'static str> },
    NotServed { implementation: &'static str, interface: &'static str },
    InstanceMismatch { expected: &'static str },
    Construction { implementation: &'static str, source: anyhow::Error },
    MissingDependency(&'static str),
    NoRemote,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoImplementation { interfaces } => {
                write!(f, "no implementation registered for [{}]", interfaces.join(", "))
            }
            Self::NotServed { implementation, interface } => {
                write!(f, "{} does not serve {}", implementation, interface)
            }
            Self::InstanceMismatch { expected } => write!(f, "resolved instance is not a {}", expected),
            Self::Construction { implementation, source } => {
                write!(f, "constructing {} failed: {:#}", implementation, source)
            }
            Self::MissingDependency(name) => write!(f, "missing dependency {}", name),
            Self::NoRemote => write!(f, "no remote peer in this context"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Typed identity of an interface, used for erased lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceId {
    pub type_id: TypeId,
    pub name: &'static str,
}

impl InterfaceId {
    pub fn of<S: Interface + ?Sized>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: S::interface_name(),
        }
    }
}

/// Shared values available to service constructors, keyed by type.
pub struct Dependencies {
    values: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self {
            values: anymap::Map::new(),
        }
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(Arc::new(value));
    }

    pub fn insert_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.values.insert(value);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values.get::<Arc<T>>().cloned()
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a service constructor may ask for.
pub struct ServiceContext<'a> {
    connection: Option<ConnectionId>,
    dependencies: &'a Dependencies,
    source: &'a dyn ServiceSource,
    remote: Remote,
}

#[derive(Clone)]
enum Remote {
    Server(Dispatch<ClientToServer>),
    Client(Dispatch<ServerToClient>, ConnectionId),
    None,
}

impl<'a> ServiceContext<'a> {
    /// The calling connection. Always `None` on the client.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn dependency<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.dependencies
            .get::<T>()
            .ok_or(Error::MissingDependency(std::any::type_name::<T>()))
    }

    /// Another local service, resolved the way the current one was.
    pub fn local_service<S: Interface + Send + Sync + ?Sized>(&self) -> Result<Arc<S>> {
        resolve_as::<S>(self.source, self.connection)
    }

    /// A proxy to the peer: the server on a client, the calling client on a server.
    pub fn remote<S: Service + Send + Sync + ?Sized>(&self) -> Result<Arc<S>> {
        match &self.remote {
            Remote::Server(dispatch) => Ok(S::proxy(dispatch.clone(), ClientToServer)),
            Remote::Client(dispatch, connection) => Ok(S::proxy(
                dispatch.clone(),
                ServerToClient { connection: *connection },
            )),
            Remote::None => Err(Error::NoRemote),
        }
    }
}

/// Builds an implementation from its context.
pub trait Construct: Sized + Send + Sync + 'static {
    fn construct(context: &ServiceContext<'_>) -> anyhow::Result<Self>;
}

type ConstructFn<T> = fn(&ServiceContext<'_>) -> anyhow::Result<T>;
type UpcastFn = fn(Arc<dyn Any + Send + Sync>) -> Option<ErasedService>;

/// A concrete implementation and the interfaces it serves.
pub struct Implementation<T> {
    construct: ConstructFn<T>,
    serves: Vec<(InterfaceId, UpcastFn)>,
}

impl<T: Construct> Implementation<T> {
    pub fn new() -> Self {
        Self::from_fn(T::construct)
    }
}

impl<T: Construct> Default for Implementation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Implementation<T> {
    pub fn from_fn(construct: ConstructFn<T>) -> Self {
        Self {
            construct,
            serves: Vec::new(),
        }
    }

    pub fn serves<S: Interface + Upcast<T> + Send + Sync + ?Sized>(mut self) -> Self {
        self.serves.push((InterfaceId::of::<S>(), upcast_erased::<T, S>));
        self
    }
}

fn upcast_erased<T, S>(instance: Arc<dyn Any + Send + Sync>) -> Option<ErasedService>
where
    T: Send + Sync + 'static,
    S: Upcast<T> + Send + Sync + ?Sized,
{
    let concrete = instance.downcast::<T>().ok()?;
    Some(Box::new(S::upcast(concrete)))
}

/// Object-safe view of an [`Implementation`], stored in the type registry.
pub trait ImplementationBinding: Send + Sync + 'static {
    fn descriptor(&self) -> TypeDescriptor;
    fn rust_name(&self) -> &'static str;
    fn implementation_id(&self) -> TypeId;
    fn interfaces(&self) -> Vec<TypeId>;
    fn construct(&self, context: &ServiceContext<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>>;
    fn upcast(&self, instance: Arc<dyn Any + Send + Sync>, interface: TypeId) -> Option<ErasedService>;
}

impl<T: Send + Sync + 'static> ImplementationBinding for Implementation<T> {
    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::new(
            std::any::type_name::<T>(),
            ModuleIdentity::new("local", "0.0.0.0", "neutral", "null"),
        )
    }

    fn rust_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn implementation_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn interfaces(&self) -> Vec<TypeId> {
        self.serves.iter().map(|(id, _)| id.type_id).collect()
    }

    fn construct(&self, context: &ServiceContext<'_>) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
        Ok(Arc::new((self.construct)(context)?))
    }

    fn upcast(&self, instance: Arc<dyn Any + Send + Sync>, interface: TypeId) -> Option<ErasedService> {
        let (_, upcast) = self.serves.iter().find(|(id, _)| id.type_id == interface)?;
        upcast(instance)
    }
}

type BindFn = fn() -> method::Result<Arc<dyn InterfaceBinding>>;

/// The invokable service allow-list: interfaces peers may call, and the
/// implementations that serve them.
#[derive(Clone, Default)]
pub struct ServiceList {
    interfaces: Vec<BindFn>,
    implementations: Vec<Arc<dyn ImplementationBinding>>,
}

impl ServiceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interface<S: Service + ?Sized>(mut self) -> Self {
        self.interfaces.push(method::bind_interface::<S>);
        self
    }

    pub fn implementation<T: Send + Sync + 'static>(mut self, implementation: Implementation<T>) -> Self {
        self.implementations.push(Arc::new(implementation));
        self
    }

    pub(crate) fn interfaces(&self) -> &[BindFn] {
        &self.interfaces
    }

    pub(crate) fn implementations(&self) -> &[Arc<dyn ImplementationBinding>] {
        &self.implementations
    }
}

/// Erased service resolution, as used by the dispatch engine.
pub trait ServiceSource: Send + Sync {
    /// Resolves an instance of `interface` as `Box<Arc<dyn S>>`.
    fn resolve(&self, interface: InterfaceId, connection: Option<ConnectionId>) -> Result<ErasedService>;
}

pub fn resolve_as<S: Interface + Send + Sync + ?Sized>(
    source: &dyn ServiceSource,
    connection: Option<ConnectionId>,
) -> Result<Arc<S>> {
    downcast_service::<S>(source.resolve(InterfaceId::of::<S>(), connection)?)
}

fn find_implementation(types: &TypeRegistry, interfaces: &[InterfaceId]) -> Result<Arc<dyn ImplementationBinding>> {
    let ids: Vec<TypeId> = interfaces.iter().map(|i| i.type_id).collect();
    types
        .resolve_implementation(Purpose::SERVICES, &ids)
        .and_then(|entry| entry.implementation_binding().cloned())
        .ok_or_else(|| Error::NoImplementation {
            interfaces: interfaces.iter().map(|i| i.name).collect(),
        })
}

fn upcast_to(
    binding: &dyn ImplementationBinding,
    instance: Arc<dyn Any + Send + Sync>,
    interface: InterfaceId,
) -> Result<ErasedService> {
    binding
        .upcast(instance, interface.type_id)
        .ok_or(Error::NotServed {
            implementation: binding.rust_name(),
            interface: interface.name,
        })
}

fn downcast_service<S: Interface + Send + Sync + ?Sized>(erased: ErasedService) -> Result<Arc<S>> {
    erased
        .downcast::<Arc<S>>()
        .map(|instance| *instance)
        .map_err(|_| Error::InstanceMismatch { expected: S::interface_name() })
}

/// Process-scoped provider used by the client.
pub struct ClientServiceProvider {
    types: Arc<TypeRegistry>,
    dependencies: Arc<Dependencies>,
    dispatch: Dispatch<ClientToServer>,
    instances: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    proxies: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ClientServiceProvider {
    pub fn new(types: Arc<TypeRegistry>, dependencies: Arc<Dependencies>, dispatch: Dispatch<ClientToServer>) -> Self {
        Self {
            types,
            dependencies,
            dispatch,
            instances: DashMap::new(),
            proxies: DashMap::new(),
        }
    }

    /// The local implementation of `S`.
    pub fn client_service<S: Interface + Send + Sync + ?Sized>(&self) -> Result<Arc<S>> {
        resolve_as::<S>(self, None)
    }

    /// The implementation serving both `S` and `L`, as `L`.
    pub fn local_service<S, L>(&self) -> Result<Arc<L>>
    where
        S: Interface + ?Sized,
        L: Interface + Send + Sync + ?Sized,
    {
        let interface = InterfaceId::of::<L>();
        let binding = find_implementation(&self.types, &[InterfaceId::of::<S>(), interface])?;
        let instance = self.instance(binding.as_ref())?;
        downcast_service::<L>(upcast_to(binding.as_ref(), instance, interface)?)
    }

    /// A cached proxy to the server's implementation of `S`.
    pub fn server_service<S: Service + Send + Sync + ?Sized>(&self) -> Arc<S> {
        let key = TypeId::of::<S>();
        if let Some(cached) = self.proxies.get(&key) {
            if let Some(proxy) = cached.value().downcast_ref::<Arc<S>>() {
                return proxy.clone();
            }
        }
        let proxy = S::proxy(self.dispatch.clone(), ClientToServer);
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(proxy.clone());
        self.proxies.entry(key).or_insert(erased);
        proxy
    }

    fn instance(&self, binding: &dyn ImplementationBinding) -> Result<Arc<dyn Any + Send + Sync>> {
        let key = binding.implementation_id();
        if let Some(cached) = self.instances.get(&key) {
            return Ok(cached.value().clone());
        }

        // Built without holding a map lock: constructors may resolve other services.
        let context = ServiceContext {
            connection: None,
            dependencies: &self.dependencies,
            source: self,
            remote: Remote::Server(self.dispatch.clone()),
        };
        let instance = binding.construct(&context).map_err(|source| Error::Construction {
            implementation: binding.rust_name(),
            source,
        })?;
        Ok(self.instances.entry(key).or_insert(instance).value().clone())
    }
}

impl ServiceSource for ClientServiceProvider {
    fn resolve(&self, interface: InterfaceId, _connection: Option<ConnectionId>) -> Result<ErasedService> {
        let binding = find_implementation(&self.types, &[interface])?;
        let instance = self.instance(binding.as_ref())?;
        upcast_to(binding.as_ref(), instance, interface)
    }
}

/// Connection-scoped provider used by the server.
pub struct ServerServiceProvider {
    types: Arc<TypeRegistry>,
    dependencies: Arc<Dependencies>,
    dispatch: Dispatch<ServerToClient>,
    connections: Arc<ConnectionMap>,
}

impl ServerServiceProvider {
    pub fn new(
        types: Arc<TypeRegistry>,
        dependencies: Arc<Dependencies>,
        dispatch: Dispatch<ServerToClient>,
        connections: Arc<ConnectionMap>,
    ) -> Self {
        Self {
            types,
            dependencies,
            dispatch,
            connections,
        }
    }

    /// A fresh instance of the local implementation of `S`, bound to `connection`.
    pub fn server_service<S: Interface + Send + Sync + ?Sized>(&self, connection: ConnectionId) -> Result<Arc<S>> {
        resolve_as::<S>(self, Some(connection))
    }

    /// A fresh instance of the implementation serving both `S` and `L`, as `L`.
    pub fn local_server_service<S, L>(&self, connection: ConnectionId) -> Result<Arc<L>>
    where
        S: Interface + ?Sized,
        L: Interface + Send + Sync + ?Sized,
    {
        let interface = InterfaceId::of::<L>();
        let binding = find_implementation(&self.types, &[InterfaceId::of::<S>(), interface])?;
        let instance = self.construct(binding.as_ref(), Some(connection))?;
        downcast_service::<L>(upcast_to(binding.as_ref(), instance, interface)?)
    }

    pub fn server_service_for_all_connections<S: Interface + Send + Sync + ?Sized>(
        &self,
    ) -> Result<Vec<(ConnectionId, Arc<S>)>> {
        self.connections
            .all()
            .into_iter()
            .map(|connection| self.server_service::<S>(connection).map(|service| (connection, service)))
            .collect()
    }

    /// A proxy to the client on `connection`.
    pub fn client_service<S: Service + Send + Sync + ?Sized>(&self, connection: ConnectionId) -> Arc<S> {
        S::proxy(self.dispatch.clone(), ServerToClient { connection })
    }

    /// One proxy per live connection.
    pub fn client_service_for_all_connections<S: Service + Send + Sync + ?Sized>(&self) -> Vec<(ConnectionId, Arc<S>)> {
        self.connections
            .all()
            .into_iter()
            .map(|connection| (connection, self.client_service::<S>(connection)))
            .collect()
    }

    fn construct(
        &self,
        binding: &dyn ImplementationBinding,
        connection: Option<ConnectionId>,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        let remote = match connection {
            Some(connection) => Remote::Client(self.dispatch.clone(), connection),
            None => Remote::None,
        };
        let context = ServiceContext {
            connection,
            dependencies: &self.dependencies,
            source: self,
            remote,
        };
        binding.construct(&context).map_err(|source| Error::Construction {
            implementation: binding.rust_name(),
            source,
        })
    }
}

impl ServiceSource for ServerServiceProvider {
    fn resolve(&self, interface: InterfaceId, connection: Option<ConnectionId>) -> Result<ErasedService> {
        let binding = find_implementation(&self.types, &[interface])?;
        let instance = self.construct(binding.as_ref(), connection)?;
        upcast_to(binding.as_ref(), instance, interface)
    }
}
