#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use culvert::Client;
use culvert::Config;
use culvert::Construct;
use culvert::Implementation;
use culvert::Server;
use culvert::ServiceContext;
use culvert::ServiceList;
use culvert::TypeList;
use culvert::memory;
use culvert::memory::MemoryConnector;
use culvert::memory::MemoryHub;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub label: String,
    pub value: i32,
}

culvert::wire_type!(Entry => "calc.Entry");

/// Served by the server.
#[culvert::service(module = "calc", version = "1.0.0")]
pub trait Calculator {
    async fn add(&self, a: i32, b: i32) -> anyhow::Result<i32>;
    async fn divide(&self, a: i32, b: i32) -> anyhow::Result<i32>;
    async fn record(&self, entry: Entry) -> anyhow::Result<()>;
    async fn history(&self) -> anyhow::Result<Vec<Entry>>;
    async fn relay(&self, message: String) -> anyhow::Result<String>;
    async fn explode(&self) -> anyhow::Result<()>;
}

/// Served by every client.
#[culvert::service(module = "calc", version = "1.0.0")]
pub trait Notifier {
    async fn notify(&self, message: String) -> anyhow::Result<String>;
}

/// Declared but served by nobody.
#[culvert::service(module = "calc", version = "1.0.0")]
pub trait Archive {
    async fn lookup(&self, key: String) -> anyhow::Result<String>;
}

#[derive(Default)]
pub struct Ledger {
    entries: Mutex<Vec<Entry>>,
}

pub struct CalculatorService {
    ledger: Arc<Ledger>,
    client: Arc<dyn Notifier>,
}

impl Construct for CalculatorService {
    fn construct(context: &ServiceContext<'_>) -> anyhow::Result<Self> {
        Ok(Self {
            ledger: context.dependency::<Ledger>()?,
            client: context.remote::<dyn Notifier>()?,
        })
    }
}

#[culvert::async_trait]
impl Calculator for CalculatorService {
    async fn add(&self, a: i32, b: i32) -> anyhow::Result<i32> {
        Ok(a + b)
    }

    async fn divide(&self, a: i32, b: i32) -> anyhow::Result<i32> {
        if b == 0 {
            anyhow::bail!("division by zero");
        }
        Ok(a / b)
    }

    async fn record(&self, entry: Entry) -> anyhow::Result<()> {
        self.ledger.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
        Ok(())
    }

    async fn history(&self) -> anyhow::Result<Vec<Entry>> {
        Ok(self.ledger.entries.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn relay(&self, message: String) -> anyhow::Result<String> {
        self.client.notify(message).await
    }

    async fn explode(&self) -> anyhow::Result<()> {
        panic!("boom");
    }
}

/// Shared handle to what a client's notifier received.
#[derive(Clone, Default)]
pub struct Inbox {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Inbox {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct NotifierService {
    inbox: Arc<Inbox>,
}

impl Construct for NotifierService {
    fn construct(context: &ServiceContext<'_>) -> anyhow::Result<Self> {
        Ok(Self {
            inbox: context.dependency::<Inbox>()?,
        })
    }
}

#[culvert::async_trait]
impl Notifier for NotifierService {
    async fn notify(&self, message: String) -> anyhow::Result<String> {
        self.inbox
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        if message == "slow" {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(message.to_uppercase())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(call_timeout: Duration) -> Config {
    Config::default()
        .with_call_timeout(call_timeout)
        .with_sweep_interval(Duration::from_millis(25))
        .with_liveness_interval(Duration::from_millis(25))
}

pub fn payload_types() -> TypeList {
    TypeList::new().add::<Entry>()
}

pub struct Harness {
    pub hub: Arc<MemoryHub>,
    pub connector: MemoryConnector,
    pub server: Server,
    pub call_timeout: Duration,
}

impl Harness {
    pub fn start(call_timeout: Duration) -> Self {
        init_tracing();
        let (hub, connector) = memory::hub();
        let hub = Arc::new(hub);
        let server = Server::builder(hub.clone())
            .config(config(call_timeout))
            .serialisable(payload_types())
            .services(
                ServiceList::new()
                    .interface::<dyn Calculator>()
                    .implementation(Implementation::<CalculatorService>::new().serves::<dyn Calculator>()),
            )
            .dependency(Ledger::default())
            .build()
            .expect("server");
        server.start();
        Self {
            hub,
            connector,
            server,
            call_timeout,
        }
    }

    /// A started client with its inbox.
    pub async fn client(&self) -> (Client, Inbox) {
        let inbox = Inbox::default();
        let client = self.client_with(payload_types(), inbox.clone()).expect("client");
        client.start().await.expect("start");
        (client, inbox)
    }

    /// An unstarted client allowing `types` on top of the builtins.
    pub fn client_with(&self, types: TypeList, inbox: Inbox) -> culvert::registry::Result<Client> {
        Client::builder(Arc::new(self.connector.client()))
            .config(config(self.call_timeout))
            .serialisable(types)
            .services(
                ServiceList::new()
                    .interface::<dyn Notifier>()
                    .implementation(Implementation::<NotifierService>::new().serves::<dyn Notifier>()),
            )
            .dependency(inbox)
            .build()
    }
}

/// Polls `condition` for up to a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within a second");
}
