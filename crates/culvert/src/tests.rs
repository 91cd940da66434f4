use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::callback::CallbackRegistry;
use crate::callback::Completion;
use crate::codec::JsonCodec;
use crate::dispatch::ConnectionMap;
use crate::ids::ConnectionId;
use crate::ids::CorrelationId;
use crate::method;
use crate::method::InterfaceBinding;
use crate::method::Returned;
use crate::outcome::CallError;
use crate::provider;
use crate::provider::ClientServiceProvider;
use crate::provider::Construct;
use crate::provider::Dependencies;
use crate::provider::Implementation;
use crate::provider::ServerServiceProvider;
use crate::provider::ServiceContext;
use crate::provider::ServiceList;
use crate::proxy::ClientToServer;
use crate::proxy::Dispatch;
use crate::proxy::Interface;
use crate::proxy::Invocation;
use crate::proxy::ServerToClient;
use crate::proxy::Service;
use crate::registry::Purpose;
use crate::registry::TypeList;
use crate::registry::TypeRegistry;
use crate::serialiser::Serialiser;
use crate::wire::WireType;

#[crate::service(module = "tests", version = "1.0.0")]
pub trait Counter {
    async fn add(&self, amount: u32) -> anyhow::Result<u32>;
    async fn reset(&self) -> anyhow::Result<()>;
}

#[crate::interface]
pub trait Describe {
    fn describe(&self) -> String;
}

struct Tally {
    label: Arc<String>,
    total: AtomicU32,
}

impl Construct for Tally {
    fn construct(context: &ServiceContext<'_>) -> anyhow::Result<Self> {
        Ok(Self {
            label: context.dependency::<String>()?,
            total: AtomicU32::new(0),
        })
    }
}

#[crate::async_trait]
impl Counter for Tally {
    async fn add(&self, amount: u32) -> anyhow::Result<u32> {
        Ok(self.total.fetch_add(amount, Ordering::SeqCst) + amount)
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.total.store(0, Ordering::SeqCst);
        Ok(())
    }
}

impl Describe for Tally {
    fn describe(&self) -> String {
        format!("{} = {}", self.label, self.total.load(Ordering::SeqCst))
    }
}

fn services() -> ServiceList {
    ServiceList::new().interface::<dyn Counter>().implementation(
        Implementation::<Tally>::new()
            .serves::<dyn Counter>()
            .serves::<dyn Describe>(),
    )
}

fn types(services: &ServiceList) -> Arc<TypeRegistry> {
    let types = Arc::new(TypeRegistry::new());
    types
        .register_type_list(Purpose::SERIALISABLE, &TypeList::builtins())
        .expect("builtins");
    types.register_service_list(services).expect("services");
    types
}

fn dependencies() -> Arc<Dependencies> {
    let mut dependencies = Dependencies::new();
    dependencies.insert("tally".to_string());
    Arc::new(dependencies)
}

fn unreachable_dispatch<M: Send + Sync + 'static>() -> Dispatch<M> {
    Arc::new(|_: Invocation, _: M| -> Result<Completion, CallError> { Err(CallError::Canceled) })
}

#[test]
fn test_shape_lists_methods_in_declaration_order() {
    let shape = <dyn Counter as Service>::shape();
    assert_eq!(
        shape.descriptor.to_string(),
        "Counter, tests, Version=1.0.0, Culture=neutral, PublicKeyToken=null"
    );
    assert_eq!(shape.methods.len(), 2);
    assert_eq!(shape.methods[0].name, "add");
    assert_eq!(shape.methods[0].parameter_types, vec![u32::descriptor()]);
    assert_eq!(
        shape.methods[0].result.as_ref().map(|r| r.descriptor.clone()),
        Some(u32::descriptor())
    );
    assert_eq!(shape.methods[1].name, "reset");
    assert!(shape.methods[1].result.is_none());
    assert!(<dyn Counter as Interface>::interface_name().ends_with("::Counter"));
}

#[tokio::test]
async fn test_method_table_decodes_then_calls() {
    let types = types(&services());
    let serialiser = Serialiser::new(Arc::new(JsonCodec), types);
    let table = <dyn Counter as Service>::method_table().expect("table");

    let index = table.find("add", &[u32::descriptor()]).expect("find");
    let arguments = vec![serialiser.serialise(&5u32).expect("serialise")];
    let decoded = table.decode(index, &serialiser, &arguments).expect("decode");

    let instance: Arc<dyn Counter> = Arc::new(Tally {
        label: Arc::new("t".into()),
        total: AtomicU32::new(1),
    });
    let returned = table
        .call(index, Box::new(instance), decoded, serialiser.clone())
        .expect("call")
        .await
        .expect("ran");

    let Returned::Value(bytes) = returned else {
        panic!("expected a value");
    };
    assert_eq!(serialiser.deserialise::<u32>(&bytes).expect("result"), 6);
}

#[test]
fn test_method_table_misses() {
    let serialiser = Serialiser::new(Arc::new(JsonCodec), types(&services()));
    let table = <dyn Counter as Service>::method_table().expect("table");

    assert!(matches!(
        table.find("add", &[String::descriptor()]),
        Err(method::Error::MethodNotFound { .. })
    ));
    assert!(matches!(table.find("subtract", &[]), Err(method::Error::MethodNotFound { .. })));

    let index = table.find("add", &[u32::descriptor()]).expect("find");
    let wrong = vec![serialiser.serialise(&"five".to_string()).expect("serialise")];
    assert!(matches!(
        table.decode(index, &serialiser, &wrong),
        Err(method::Error::Argument { index: 0, .. })
    ));
    assert!(matches!(
        table.decode(index, &serialiser, &[]),
        Err(method::Error::ArgumentCount { expected: 1, found: 0 })
    ));
}

#[tokio::test]
async fn test_proxy_packages_calls() {
    let callbacks = Arc::new(CallbackRegistry::new(Duration::from_secs(5)));
    let registry = callbacks.clone();
    let dispatch: Dispatch<ClientToServer> = Arc::new(
        move |invocation: Invocation, _: ClientToServer| -> Result<Completion, CallError> {
            let shape = invocation.shape().expect("shape");
            let id = CorrelationId::new();
            let completion = registry
                .register(id, None, shape.result.clone())
                .expect("register");
            let value = match invocation.arguments.first() {
                Some(argument) => {
                    let amount = *argument.downcast_ref::<u32>().expect("u32 argument");
                    Some(Box::new(amount * 2) as Box<dyn std::any::Any + Send>)
                }
                None => None,
            };
            registry.resolve(id, value, None).expect("resolve");
            Ok(completion)
        },
    );

    let proxy = <dyn Counter as Service>::proxy(dispatch, ClientToServer);
    assert_eq!(proxy.add(21).await.expect("add"), 42);
    proxy.reset().await.expect("reset");
    assert_eq!(callbacks.pending_count(), 0);
}

#[tokio::test]
async fn test_proxy_surfaces_dispatch_errors() {
    let proxy = <dyn Counter as Service>::proxy(unreachable_dispatch(), ClientToServer);
    let error = proxy.add(1).await.expect_err("dispatch fails");
    assert!(matches!(error.downcast_ref::<CallError>(), Some(CallError::Canceled)));
}

#[tokio::test]
async fn test_client_provider_shares_one_instance() {
    let services = services();
    let provider = ClientServiceProvider::new(types(&services), dependencies(), unreachable_dispatch());

    let first = provider.client_service::<dyn Counter>().expect("first");
    let second = provider.client_service::<dyn Counter>().expect("second");
    first.add(2).await.expect("add");
    assert_eq!(second.add(3).await.expect("add"), 5);

    let describe = provider
        .local_service::<dyn Counter, dyn Describe>()
        .expect("describe");
    assert_eq!(describe.describe(), "tally = 5");
}

#[tokio::test]
async fn test_server_provider_builds_per_resolution() {
    let services = services();
    let connections = Arc::new(ConnectionMap::new());
    let connection = ConnectionId::new();
    let provider = ServerServiceProvider::new(
        types(&services),
        dependencies(),
        unreachable_dispatch::<ServerToClient>(),
        connections,
    );

    let first = provider.server_service::<dyn Counter>(connection).expect("first");
    let second = provider.server_service::<dyn Counter>(connection).expect("second");
    first.add(2).await.expect("add");
    assert_eq!(second.add(3).await.expect("add"), 3);
}

#[test]
fn test_construction_failures_are_reported() {
    let services = services();
    let provider = ClientServiceProvider::new(
        types(&services),
        Arc::new(Dependencies::new()),
        unreachable_dispatch(),
    );
    assert!(matches!(
        provider.client_service::<dyn Counter>(),
        Err(provider::Error::Construction { .. })
    ));

    let bare = ClientServiceProvider::new(
        types(&ServiceList::new().interface::<dyn Counter>()),
        dependencies(),
        unreachable_dispatch(),
    );
    assert!(matches!(
        bare.client_service::<dyn Counter>(),
        Err(provider::Error::NoImplementation { .. })
    ));
}

#[test]
fn test_interfaces_resolve_implementations_by_set() {
    let types = types(&services());
    let counter = std::any::TypeId::of::<dyn Counter>();
    let describe = std::any::TypeId::of::<dyn Describe>();

    let entry = types
        .resolve_implementation(Purpose::SERVICES, &[counter, describe])
        .expect("implementation");
    assert!(entry.implementation_binding().is_some());
    assert!(
        types
            .resolve_implementation(Purpose::SERVICES, &[std::any::TypeId::of::<u32>()])
            .is_none()
    );
}
