//! Server driver: many connections, each addressable by a stable logical id.
//!
//! A hub either feeds the server through [`Server::serve`] over a
//! [`ServerTransport`] event stream, or calls the entry points
//! [`Server::connection_opened`], [`Server::message_received`] and
//! [`Server::connection_closed`] itself.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::callback::CallbackRegistry;
use crate::callback::Completion;
use crate::cleanup::Sweeper;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::config::Config;
use crate::dispatch::ConnectionMap;
use crate::dispatch::DispatchError;
use crate::dispatch::Engine;
use crate::ids::ConnectionId;
use crate::ids::TransportId;
use crate::outcome::CallError;
use crate::provider::Dependencies;
use crate::provider::ServerServiceProvider;
use crate::provider::ServiceList;
use crate::proxy::Dispatch;
use crate::proxy::Invocation;
use crate::proxy::ServerToClient;
use crate::proxy::Service;
use crate::registry;
use crate::registry::Purpose;
use crate::registry::TypeList;
use crate::registry::TypeRegistry;
use crate::transport::ConnectionEvent;
use crate::transport::ServerTransport;

pub struct ServerBuilder {
    transport: Arc<dyn ServerTransport>,
    config: Config,
    serialisable: Vec<TypeList>,
    services: ServiceList,
    dependencies: Dependencies,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
}

impl ServerBuilder {
    pub fn new(transport: Arc<dyn ServerTransport>) -> Self {
        Self {
            transport,
            config: Config::default(),
            serialisable: vec![TypeList::builtins()],
            services: ServiceList::new(),
            dependencies: Dependencies::new(),
            codec: Arc::new(JsonCodec),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Adds payload types to the allow-list. The builtins are always allowed.
    pub fn serialisable(mut self, types: TypeList) -> Self {
        self.serialisable.push(types);
        self
    }

    /// The services clients may invoke, and their implementations.
    pub fn services(mut self, services: ServiceList) -> Self {
        self.services = services;
        self
    }

    pub fn dependency<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.dependencies.insert(value);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> registry::Result<Server> {
        let types = Arc::new(TypeRegistry::new());
        for list in &self.serialisable {
            types.register_type_list(Purpose::SERIALISABLE, list)?;
        }
        types.register_service_list(&self.services)?;

        let callbacks = Arc::new(CallbackRegistry::with_clock(self.config.call_timeout, self.clock));
        let engine = Engine::new(types.clone(), callbacks, self.codec);
        let connections = Arc::new(ConnectionMap::new());
        let dependencies = Arc::new(self.dependencies);
        let transport = self.transport;
        let config = self.config;

        let inner = Arc::new_cyclic(|weak: &Weak<ServerInner>| ServerInner {
            engine,
            provider: ServerServiceProvider::new(types, dependencies, dispatcher(weak.clone()), connections.clone()),
            transport,
            connections,
            config,
            tasks: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
        });
        Ok(Server { inner })
    }
}

fn dispatcher(inner: Weak<ServerInner>) -> Dispatch<ServerToClient> {
    Arc::new(
        move |invocation: Invocation, metadata: ServerToClient| -> Result<Completion, CallError> {
            let inner = inner
                .upgrade()
                .ok_or(DispatchError::NoLiveConnection(metadata.connection))?;
            inner.dispatch(invocation, metadata.connection)
        },
    )
}

/// The server side of every connection.
///
/// Dropping it stops the serve loop and the expiry sweeper.
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    engine: Engine,
    provider: ServerServiceProvider,
    transport: Arc<dyn ServerTransport>,
    connections: Arc<ConnectionMap>,
    config: Config,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Server {
    pub fn builder(transport: Arc<dyn ServerTransport>) -> ServerBuilder {
        ServerBuilder::new(transport)
    }

    /// Spawns the serve loop and the expiry sweeper. Calling it again restarts both.
    pub fn start(&self) {
        let serve = tokio::spawn(serve(self.inner.clone()));
        let sweeper = Sweeper::spawn(self.inner.engine.callbacks().clone(), self.inner.config.sweep_interval);
        self.inner.replace_tasks(vec![serve], Some(sweeper));
    }

    /// Stops the serve loop and the expiry sweeper. Live connections stay mapped.
    pub fn stop(&self) {
        self.inner.replace_tasks(Vec::new(), None);
    }

    /// Runs the event loop on the current task until the transport shuts down.
    pub async fn serve(&self) {
        serve(self.inner.clone()).await;
    }

    /// Maps a new transport connection, returning its logical id.
    pub fn connection_opened(&self, transport: &TransportId) -> ConnectionId {
        self.inner.opened(transport)
    }

    /// Handles one inbound frame, sending the reply back on the same transport connection.
    ///
    /// Frames from a transport that is not open are dropped.
    pub async fn message_received(&self, transport: &TransportId, payload: &[u8]) {
        let Some(connection) = self.inner.mapped(transport) else {
            return;
        };
        self.inner.handle(transport, connection, payload).await;
    }

    /// Unmaps a transport connection and cancels the calls waiting on it.
    pub fn connection_closed(&self, transport: &TransportId) -> Option<ConnectionId> {
        self.inner.closed(transport)
    }

    pub fn services(&self) -> &ServerServiceProvider {
        &self.inner.provider
    }

    /// A proxy to the client on `connection`.
    pub fn client_service<S: Service + Send + Sync + ?Sized>(&self, connection: ConnectionId) -> Arc<S> {
        self.inner.provider.client_service::<S>(connection)
    }

    pub fn connections(&self) -> &ConnectionMap {
        &self.inner.connections
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        self.inner.engine.callbacks()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.replace_tasks(Vec::new(), None);
    }
}

impl ServerInner {
    fn dispatch(&self, invocation: Invocation, connection: ConnectionId) -> Result<Completion, CallError> {
        let target = self
            .connections
            .transport_of(connection)
            .ok_or(DispatchError::NoLiveConnection(connection))?;

        let (payload, completion) = self.engine.prepare(invocation, Some(connection))?;
        let id = completion.correlation_id();
        let transport = self.transport.clone();
        let callbacks = self.engine.callbacks().clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(&target, &payload).await {
                warn!(correlation_id = %id, %connection, error = %e, "send failed");
                let _ = callbacks.reject(id, CallError::Dispatch(DispatchError::Transport(e)), Some(connection));
            }
        });
        Ok(completion)
    }

    fn opened(&self, transport: &TransportId) -> ConnectionId {
        let connection = self.connections.connect(transport);
        info!(%transport, %connection, "connection opened");
        connection
    }

    fn closed(&self, transport: &TransportId) -> Option<ConnectionId> {
        let connection = self.connections.remove_external(transport)?;
        let canceled = self.engine.callbacks().cancel_owned_by(connection);
        info!(%transport, %connection, canceled, "connection closed");
        Some(connection)
    }

    fn mapped(&self, transport: &TransportId) -> Option<ConnectionId> {
        let connection = self.connections.connection_of(transport);
        if connection.is_none() {
            warn!(%transport, "dropping frame from unknown connection");
        }
        connection
    }

    async fn handle(&self, transport: &TransportId, connection: ConnectionId, payload: &[u8]) {
        let Some(reply) = self.engine.receive(payload, Some(connection), &self.provider).await else {
            return;
        };
        if let Err(e) = self.transport.send(transport, &reply).await {
            warn!(%connection, error = %e, "could not send callback");
        }
    }

    fn replace_tasks(&self, tasks: Vec<JoinHandle<()>>, sweeper: Option<Sweeper>) {
        let old = std::mem::replace(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner), tasks);
        for task in old {
            task.abort();
        }
        // The previous sweeper, if any, stops when dropped here.
        *self.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = sweeper;
    }
}

async fn serve(inner: Arc<ServerInner>) {
    while let Some(event) = inner.transport.next_event().await {
        match event {
            ConnectionEvent::Connected(transport) => {
                inner.opened(&transport);
            }
            ConnectionEvent::Message(transport, payload) => {
                let Some(connection) = inner.mapped(&transport) else {
                    continue;
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.handle(&transport, connection, &payload).await;
                });
            }
            ConnectionEvent::Disconnected(transport) => {
                inner.closed(&transport);
            }
        }
    }
    debug!("server transport shut down");
}
