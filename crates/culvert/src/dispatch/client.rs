//! Client driver: one logical connection to one server.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
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
use crate::dispatch::ConnectionError;
use crate::dispatch::DispatchError;
use crate::dispatch::Engine;
use crate::outcome::CallError;
use crate::provider::ClientServiceProvider;
use crate::provider::Dependencies;
use crate::provider::ServiceList;
use crate::proxy::ClientToServer;
use crate::proxy::Dispatch;
use crate::proxy::Invocation;
use crate::proxy::Service;
use crate::registry;
use crate::registry::Purpose;
use crate::registry::TypeList;
use crate::registry::TypeRegistry;
use crate::transport;
use crate::transport::ClientTransport;
use crate::transport::ConnectionState;

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;

type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

pub struct ClientBuilder {
    transport: Arc<dyn ClientTransport>,
    config: Config,
    serialisable: Vec<TypeList>,
    services: ServiceList,
    dependencies: Dependencies,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
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

    /// The services the server may invoke on this client, and the local implementations.
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

    pub fn build(self) -> registry::Result<Client> {
        let types = Arc::new(TypeRegistry::new());
        for list in &self.serialisable {
            types.register_type_list(Purpose::SERIALISABLE, list)?;
        }
        types.register_service_list(&self.services)?;

        let callbacks = Arc::new(CallbackRegistry::with_clock(self.config.call_timeout, self.clock));
        let engine = Engine::new(types.clone(), callbacks, self.codec);
        let dependencies = Arc::new(self.dependencies);
        let transport = self.transport;
        let config = self.config;

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            engine,
            provider: ClientServiceProvider::new(types, dependencies, dispatcher(weak.clone())),
            transport,
            config,
            state: AtomicU8::new(DISCONNECTED),
            on_disconnected: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
        });
        Ok(Client { inner })
    }
}

fn dispatcher(inner: Weak<ClientInner>) -> Dispatch<ClientToServer> {
    Arc::new(move |invocation: Invocation, _: ClientToServer| -> Result<Completion, CallError> {
        let inner = inner.upgrade().ok_or(DispatchError::NotConnected)?;
        inner.dispatch(invocation)
    })
}

/// The client side of a connection.
///
/// Dropping it stops every background task; proxies outliving it fail with
/// `NotConnected`.
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    engine: Engine,
    provider: ClientServiceProvider,
    transport: Arc<dyn ClientTransport>,
    config: Config,
    state: AtomicU8,
    on_disconnected: Mutex<Option<DisconnectHandler>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Client {
    pub fn builder(transport: Arc<dyn ClientTransport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Connects, then starts the receive pump, the liveness check and the expiry sweeper.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let inner = &self.inner;
        match inner
            .state
            .compare_exchange(DISCONNECTED, CONNECTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(CONNECTED) => return Err(ConnectionError::AlreadyConnected),
            Err(_) => return Err(ConnectionError::AlreadyConnecting),
        }

        if let Err(e) = inner.transport.connect().await {
            inner.state.store(DISCONNECTED, Ordering::SeqCst);
            warn!(error = %e, "cannot connect");
            return Err(ConnectionError::CannotConnect(e));
        }
        inner.state.store(CONNECTED, Ordering::SeqCst);
        info!("client connected");

        let pump = tokio::spawn(pump(inner.clone()));
        let liveness = tokio::spawn(liveness(Arc::downgrade(inner), inner.config.liveness_interval));
        inner.replace_tasks(vec![pump, liveness]);

        let mut sweeper = inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_none() {
            *sweeper = Some(Sweeper::spawn(
                inner.engine.callbacks().clone(),
                inner.config.sweep_interval,
            ));
        }
        Ok(())
    }

    /// Disconnects without invoking the disconnect handler.
    pub async fn stop(&self) -> transport::Result<()> {
        self.inner.state.store(DISCONNECTED, Ordering::SeqCst);
        self.inner.replace_tasks(Vec::new());
        self.inner.transport.disconnect().await
    }

    /// Runs `handler` once each time the connection is lost.
    pub fn on_disconnected(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .on_disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.state.load(Ordering::SeqCst) {
            CONNECTED => ConnectionState::Connected,
            CONNECTING => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn services(&self) -> &ClientServiceProvider {
        &self.inner.provider
    }

    /// A proxy to the server's implementation of `S`.
    pub fn server_service<S: Service + Send + Sync + ?Sized>(&self) -> Arc<S> {
        self.inner.provider.server_service::<S>()
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        self.inner.engine.callbacks()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.replace_tasks(Vec::new());
        self.inner.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl ClientInner {
    fn dispatch(&self, invocation: Invocation) -> Result<Completion, CallError> {
        if self.state.load(Ordering::SeqCst) != CONNECTED {
            return Err(DispatchError::NotConnected.into());
        }

        let (payload, completion) = self.engine.prepare(invocation, None)?;
        let id = completion.correlation_id();
        let transport = self.transport.clone();
        let callbacks = self.engine.callbacks().clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send(&payload).await {
                warn!(correlation_id = %id, error = %e, "send failed");
                let _ = callbacks.reject(id, CallError::Dispatch(DispatchError::Transport(e)), None);
            }
        });
        Ok(completion)
    }

    fn replace_tasks(&self, tasks: Vec<JoinHandle<()>>) {
        let old = std::mem::replace(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner), tasks);
        for task in old {
            task.abort();
        }
    }

    /// Moves to `Disconnected`, firing the handler if the client was connected.
    fn mark_disconnected(&self) {
        if self.state.swap(DISCONNECTED, Ordering::SeqCst) != CONNECTED {
            return;
        }
        info!("client disconnected");
        let handler = self
            .on_disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

async fn pump(inner: Arc<ClientInner>) {
    loop {
        match inner.transport.recv().await {
            Ok(Some(message)) => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    let Some(reply) = inner.engine.receive(&message, None, &inner.provider).await else {
                        return;
                    };
                    if let Err(e) = inner.transport.send(&reply).await {
                        warn!(error = %e, "could not send callback");
                    }
                });
            }
            Ok(None) => {
                debug!("transport closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "transport receive failed");
                break;
            }
        }
    }
    inner.mark_disconnected();
}

async fn liveness(inner: Weak<ClientInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.state.load(Ordering::SeqCst) != CONNECTED {
            break;
        }
        if inner.transport.state() != ConnectionState::Connected {
            inner.mark_disconnected();
            break;
        }
    }
}
