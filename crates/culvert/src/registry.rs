//! # Type Registry
//!
//! Resolves wire type identifiers to runtime type handles, partitioned by purpose.
//!
//! ## Philosophy
//!
//! - **Allow-List**: a type is only ever resolved if it was registered for the
//!   purpose being asked about. Payload types and service types never mix.
//! - **Warm-Up Then Read**: registration happens while building a client or server;
//!   afterwards the registry is only read, concurrently, through `DashMap`.
//!
//! ## Resolution
//!
//! Lookups are keyed by `(module name, module version, key token, name, arity)`.
//! Among entries sharing a key, an entry whose bound arguments equal the request's
//! wins. Otherwise the open (or partially bound) entry with the longest argument
//! prefix matching the request is used. Failing both, a type whose module was
//! allowed as a whole resolves to its open definition.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use qualname::TypeDescriptor;
use qualname::TypeKey;

use crate::method;
use crate::method::InterfaceBinding;
use crate::provider::ImplementationBinding;
use crate::provider::ServiceList;
use crate::wire::WireType;

#[derive(Debug)]
pub enum Error {
    Parse(qualname::Error),
    NotFound { purpose: Purpose, type_name: String },
    Conflict { purpose: Purpose, type_name: String },
    Method(method::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "malformed type identifier: {}", e),
            Self::NotFound { purpose, type_name } => {
                write!(f, "type '{}' not found for purpose {}", type_name, purpose)
            }
            Self::Conflict { purpose, type_name } => {
                write!(f, "type '{}' already registered for purpose {} with a different handle", type_name, purpose)
            }
            Self::Method(e) => write!(f, "service method table: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<qualname::Error> for Error {
    fn from(e: qualname::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<method::Error> for Error {
    fn from(e: method::Error) -> Self {
        Self::Method(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A namespace within the registry.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct Purpose(pub &'static str);

impl Purpose {
    /// Invokable service interfaces and their implementations.
    pub const SERVICES: Purpose = Purpose("Services");
    /// Types allowed as payloads.
    pub const SERIALISABLE: Purpose = Purpose("Serialisable");
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Clone)]
pub enum TypeKind {
    /// A payload type.
    Data,
    /// A service interface, with its inbound method table.
    Interface(Arc<dyn InterfaceBinding>),
    /// A concrete service implementation and the interfaces it serves.
    Implementation(Arc<dyn ImplementationBinding>),
}

impl std::fmt::Debug for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "Data"),
            Self::Interface(b) => write!(f, "Interface({})", b.rust_name()),
            Self::Implementation(b) => write!(f, "Implementation({})", b.rust_name()),
        }
    }
}

/// The runtime side of a registration.
#[derive(Clone, Debug)]
pub struct TypeHandle {
    pub rust_name: &'static str,
    /// `None` for open generic registrations, which have no single Rust type.
    pub type_id: Option<TypeId>,
    pub kind: TypeKind,
}

#[derive(Clone, Debug)]
pub struct TypeEntry {
    pub descriptor: TypeDescriptor,
    pub handle: TypeHandle,
}

impl TypeEntry {
    pub fn data<T: WireType>() -> Self {
        Self {
            descriptor: T::descriptor(),
            handle: TypeHandle {
                rust_name: std::any::type_name::<T>(),
                type_id: Some(TypeId::of::<T>()),
                kind: TypeKind::Data,
            },
        }
    }

    /// A registration that covers every instantiation sharing `descriptor`'s bound prefix.
    pub fn open(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            handle: TypeHandle {
                rust_name: "<open>",
                type_id: None,
                kind: TypeKind::Data,
            },
        }
    }

    pub fn interface(binding: Arc<dyn InterfaceBinding>) -> Self {
        Self {
            descriptor: binding.descriptor().clone(),
            handle: TypeHandle {
                rust_name: binding.rust_name(),
                type_id: Some(binding.interface_id()),
                kind: TypeKind::Interface(binding),
            },
        }
    }

    pub fn implementation(binding: Arc<dyn ImplementationBinding>) -> Self {
        Self {
            descriptor: binding.descriptor(),
            handle: TypeHandle {
                rust_name: binding.rust_name(),
                type_id: Some(binding.implementation_id()),
                kind: TypeKind::Implementation(binding),
            },
        }
    }

    pub fn interface_binding(&self) -> Option<&Arc<dyn InterfaceBinding>> {
        match &self.handle.kind {
            TypeKind::Interface(b) => Some(b),
            _ => None,
        }
    }

    pub fn implementation_binding(&self) -> Option<&Arc<dyn ImplementationBinding>> {
        match &self.handle.kind {
            TypeKind::Implementation(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Table {
    by_key: HashMap<TypeKey, Vec<TypeEntry>>,
    order: Vec<TypeEntry>,
    modules: HashSet<String>,
}

#[derive(Default)]
pub struct TypeRegistry {
    purposes: DashMap<Purpose, Table>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one entry. Re-registering the same descriptor with the same type is a no-op.
    pub fn register(&self, purpose: Purpose, entry: TypeEntry) -> Result<()> {
        let mut table = self.purposes.entry(purpose).or_default();
        let key = entry.descriptor.key();

        if let Some(existing) = table
            .by_key
            .get(&key)
            .and_then(|entries| entries.iter().find(|e| e.descriptor == entry.descriptor))
        {
            if existing.handle.type_id == entry.handle.type_id {
                return Ok(());
            }
            return Err(Error::Conflict {
                purpose,
                type_name: entry.descriptor.to_string(),
            });
        }

        table.by_key.entry(key).or_default().push(entry.clone());
        table.order.push(entry);
        Ok(())
    }

    /// Allows every type declared by the module named `module`, whatever its version.
    pub fn register_module(&self, purpose: Purpose, module: &str) {
        let mut table = self.purposes.entry(purpose).or_default();
        table.modules.insert(module.to_string());
    }

    pub fn register_type_list(&self, purpose: Purpose, list: &TypeList) -> Result<()> {
        for entry in &list.entries {
            self.register(purpose, entry.clone())?;
        }
        for module in &list.modules {
            self.register_module(purpose, module);
        }
        Ok(())
    }

    /// Registers every interface and implementation of `list` under `Purpose::SERVICES`.
    pub fn register_service_list(&self, list: &ServiceList) -> Result<()> {
        for bind in list.interfaces() {
            self.register(Purpose::SERVICES, TypeEntry::interface(bind()?))?;
        }
        for implementation in list.implementations() {
            self.register(Purpose::SERVICES, TypeEntry::implementation(implementation.clone()))?;
        }
        Ok(())
    }

    pub fn resolve_name(&self, purpose: Purpose, type_name: &str) -> Result<TypeEntry> {
        let descriptor = TypeDescriptor::parse(type_name)?;
        self.resolve_descriptor(purpose, &descriptor)
    }

    pub fn resolve_descriptor(&self, purpose: Purpose, descriptor: &TypeDescriptor) -> Result<TypeEntry> {
        let not_found = || Error::NotFound {
            purpose,
            type_name: descriptor.to_string(),
        };

        let table = self.purposes.get(&purpose).ok_or_else(not_found)?;
        if let Some(entry) = table
            .by_key
            .get(&descriptor.key())
            .and_then(|candidates| best_match(candidates, descriptor))
        {
            return Ok(entry);
        }

        if table.modules.contains(&descriptor.module.name) {
            return Ok(TypeEntry::open(descriptor.definition()));
        }
        Err(not_found())
    }

    /// The first registered implementation serving every interface in `interfaces`.
    pub fn resolve_implementation(&self, purpose: Purpose, interfaces: &[TypeId]) -> Option<TypeEntry> {
        let table = self.purposes.get(&purpose)?;
        table
            .order
            .iter()
            .find(|entry| match &entry.handle.kind {
                TypeKind::Implementation(b) => {
                    let served = b.interfaces();
                    interfaces.iter().all(|i| served.contains(i))
                }
                _ => false,
            })
            .cloned()
    }

    pub fn len(&self, purpose: Purpose) -> usize {
        self.purposes.get(&purpose).map(|t| t.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, purpose: Purpose) -> bool {
        self.len(purpose) == 0
    }
}

fn best_match(candidates: &[TypeEntry], descriptor: &TypeDescriptor) -> Option<TypeEntry> {
    if let Some(exact) = candidates
        .iter()
        .find(|e| e.descriptor.generic_arguments == descriptor.generic_arguments)
    {
        return Some(exact.clone());
    }

    candidates
        .iter()
        .filter(|e| !e.descriptor.is_fully_bound())
        .filter(|e| descriptor.generic_arguments.starts_with(&e.descriptor.generic_arguments))
        .max_by_key(|e| e.descriptor.generic_arguments.len())
        .cloned()
}

/// An allow-list of payload types.
///
/// ```ignore
/// TypeList::builtins()
///     .add::<Point>()
///     .open::<Vec<Point>>()        // Vec<_> for any allowed element
///     .prefix::<HashMap<String, u8>>(1) // HashMap<String, _>
///     .module("geometry")          // everything geometry declares
/// ```
#[derive(Clone, Debug, Default)]
pub struct TypeList {
    entries: Vec<TypeEntry>,
    modules: Vec<String>,
}

impl TypeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scalar builtins and open `Vec`, `Option`, `HashMap` and tuples.
    pub fn builtins() -> Self {
        Self::new()
            .add::<bool>()
            .add::<char>()
            .add::<u8>()
            .add::<u16>()
            .add::<u32>()
            .add::<u64>()
            .add::<i8>()
            .add::<i16>()
            .add::<i32>()
            .add::<i64>()
            .add::<f32>()
            .add::<f64>()
            .add::<String>()
            .open::<Vec<u8>>()
            .open::<Option<u8>>()
            .open::<std::collections::HashMap<u8, u8>>()
            .open::<(u8, u8)>()
            .open::<(u8, u8, u8)>()
    }

    /// Allows exactly `T`.
    pub fn add<T: WireType>(mut self) -> Self {
        self.entries.push(TypeEntry::data::<T>());
        self
    }

    /// Allows every instantiation of `T`'s generic definition.
    pub fn open<T: WireType>(self) -> Self {
        self.prefix::<T>(0)
    }

    /// Allows instantiations of `T`'s definition whose first `n` arguments match `T`'s.
    pub fn prefix<T: WireType>(self, n: usize) -> Self {
        self.descriptor(T::descriptor().bound_prefix(n))
    }

    pub fn descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.entries.push(TypeEntry::open(descriptor));
        self
    }

    /// Allows every type whose descriptor names `module`. Generic arguments are still checked.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }

    pub fn entries(&self) -> &[TypeEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::std_module;

    fn registry(list: TypeList) -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register_type_list(Purpose::SERIALISABLE, &list)
            .expect("register");
        registry
    }

    #[test]
    fn test_closed_registration_wins_over_open() {
        let registry = registry(TypeList::new().add::<Vec<String>>().open::<Vec<String>>());

        let closed = registry
            .resolve_name(Purpose::SERIALISABLE, &<Vec<String>>::descriptor().to_string())
            .expect("closed");
        assert_eq!(closed.handle.type_id, Some(TypeId::of::<Vec<String>>()));

        let fallback = registry
            .resolve_name(Purpose::SERIALISABLE, &<Vec<i32>>::descriptor().to_string())
            .expect("open fallback");
        assert_eq!(fallback.handle.type_id, None);
        assert_eq!(fallback.descriptor, TypeDescriptor::open("Vec", 1, std_module()));
    }

    #[test]
    fn test_partial_prefix_must_match() {
        type Map<K, V> = std::collections::HashMap<K, V>;
        let registry = registry(TypeList::new().prefix::<Map<String, u8>>(1));

        assert!(registry
            .resolve_descriptor(Purpose::SERIALISABLE, &<Map<String, bool>>::descriptor())
            .is_ok());
        assert!(matches!(
            registry.resolve_descriptor(Purpose::SERIALISABLE, &<Map<u8, bool>>::descriptor()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_longest_prefix_is_preferred() {
        type Map<K, V> = std::collections::HashMap<K, V>;
        let registry = registry(TypeList::new().open::<Map<u8, u8>>().prefix::<Map<String, u8>>(1));

        let entry = registry
            .resolve_descriptor(Purpose::SERIALISABLE, &<Map<String, bool>>::descriptor())
            .expect("resolve");
        assert_eq!(entry.descriptor.generic_arguments.len(), 1);
    }

    #[test]
    fn test_module_allows_every_type_it_declares() {
        let geometry = qualname::ModuleIdentity::new("geometry", "2.1.0", "neutral", "null");
        let registry = registry(TypeList::new().add::<String>().module("geometry"));

        let circle = TypeDescriptor::new("Circle", geometry.clone());
        let entry = registry
            .resolve_descriptor(Purpose::SERIALISABLE, &circle)
            .expect("module member");
        assert_eq!(entry.descriptor, circle);
        assert_eq!(entry.handle.type_id, None);

        let polygon = TypeDescriptor::generic("Polygon", vec![String::descriptor()], geometry);
        let entry = registry
            .resolve_descriptor(Purpose::SERIALISABLE, &polygon)
            .expect("generic module member");
        assert_eq!(entry.descriptor, polygon.definition());

        let elsewhere = qualname::ModuleIdentity::new("physics", "2.1.0", "neutral", "null");
        assert!(matches!(
            registry.resolve_descriptor(Purpose::SERIALISABLE, &TypeDescriptor::new("Circle", elsewhere)),
            Err(Error::NotFound { .. })
        ));
        assert!(registry
            .resolve_descriptor(Purpose::SERVICES, &TypeDescriptor::new("Circle", std_module()))
            .is_err());
    }

    #[test]
    fn test_registered_entry_wins_over_module() {
        let registry = registry(TypeList::new().add::<Vec<String>>().module("std"));
        let entry = registry
            .resolve_descriptor(Purpose::SERIALISABLE, &<Vec<String>>::descriptor())
            .expect("resolve");
        assert_eq!(entry.handle.type_id, Some(TypeId::of::<Vec<String>>()));

        let fallback = registry
            .resolve_descriptor(Purpose::SERIALISABLE, &<Vec<u8>>::descriptor())
            .expect("module fallback");
        assert_eq!(fallback.handle.type_id, None);
        assert_eq!(registry.len(Purpose::SERIALISABLE), 1);
    }

    #[test]
    fn test_purposes_are_isolated() {
        let registry = registry(TypeList::new().add::<String>());
        assert!(registry.resolve_descriptor(Purpose::SERIALISABLE, &String::descriptor()).is_ok());
        assert!(registry.resolve_descriptor(Purpose::SERVICES, &String::descriptor()).is_err());
        assert!(registry.resolve_descriptor(Purpose("Other"), &String::descriptor()).is_err());
    }

    #[test]
    fn test_unregistered_and_malformed_names() {
        let registry = registry(TypeList::new().add::<String>());
        assert!(matches!(
            registry.resolve_descriptor(Purpose::SERIALISABLE, &u32::descriptor()),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            registry.resolve_name(Purpose::SERIALISABLE, "String[[, std"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = TypeRegistry::new();
        registry.register(Purpose::SERIALISABLE, TypeEntry::data::<String>()).expect("first");
        registry.register(Purpose::SERIALISABLE, TypeEntry::data::<String>()).expect("second");
        assert_eq!(registry.len(Purpose::SERIALISABLE), 1);

        let conflicting = TypeEntry::open(String::descriptor());
        assert!(matches!(
            registry.register(Purpose::SERIALISABLE, conflicting),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(registry(TypeList::builtins()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        registry
                            .resolve_descriptor(Purpose::SERIALISABLE, &<Vec<Option<String>>>::descriptor())
                            .expect("resolve");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
    }
}
