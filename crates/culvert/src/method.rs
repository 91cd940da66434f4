//! # Method Tables
//!
//! Static descriptions of service interfaces, built once per interface by
//! `#[culvert::service]`.
//!
//! - [`ServiceShape`] is the outbound view: method names, parameter type identifiers
//!   and result types, enough to encode an invocation.
//! - [`MethodTable`] is the inbound view: `(name, parameter types)` mapped to a decoder
//!   and an invoker. Decoding and invoking are separate steps because their failures
//!   are reported differently (a decode failure is dropped, an invoke failure is faulted).

use std::any::Any;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use qualname::TypeDescriptor;

use crate::outcome::ResultType;
use crate::proxy::Service;
use crate::serialiser;
use crate::serialiser::Serialiser;
use crate::wire::WireType;

#[derive(Debug)]
pub enum Error {
    MethodNotFound { service: String, method: String, parameter_types: Vec<String> },
    AmbiguousOverload { service: String, method: String },
    ArgumentCount { expected: usize, found: usize },
    Argument { index: usize, source: serialiser::Error },
    InstanceMismatch { expected: &'static str },
    DecodedArgumentsMismatch { expected: &'static str },
    NoSuchMethod(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MethodNotFound { service, method, parameter_types } => {
                write!(f, "method not found: {}.{}({})", service, method, parameter_types.join("; "))
            }
            Self::AmbiguousOverload { service, method } => {
                write!(f, "ambiguous overload: {}.{} registered twice with the same parameters", service, method)
            }
            Self::ArgumentCount { expected, found } => {
                write!(f, "expected {} arguments, found {}", expected, found)
            }
            Self::Argument { index, source } => write!(f, "argument {}: {}", index, source),
            Self::InstanceMismatch { expected } => write!(f, "service instance is not a {}", expected),
            Self::DecodedArgumentsMismatch { expected } => {
                write!(f, "decoded arguments are not a {}", expected)
            }
            Self::NoSuchMethod(index) => write!(f, "no method at index {}", index),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Argument { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One method as seen by a caller.
#[derive(Debug, Clone)]
pub struct MethodShape {
    pub name: &'static str,
    pub parameter_types: Vec<TypeDescriptor>,
    /// `None` for methods returning `()`.
    pub result: Option<ResultType>,
}

impl MethodShape {
    pub fn new(name: &'static str, parameter_types: Vec<TypeDescriptor>, result: Option<ResultType>) -> Self {
        Self { name, parameter_types, result }
    }
}

/// A service interface as seen by a caller.
#[derive(Debug, Clone)]
pub struct ServiceShape {
    pub descriptor: TypeDescriptor,
    pub name: &'static str,
    pub methods: Vec<MethodShape>,
}

impl ServiceShape {
    pub fn new(descriptor: TypeDescriptor, name: &'static str, methods: Vec<MethodShape>) -> Self {
        Self { descriptor, name, methods }
    }

    pub fn method(&self, index: usize) -> Option<&MethodShape> {
        self.methods.get(index)
    }
}

/// Decoded arguments of one call, as the tuple the invoker expects.
pub struct DecodedArgs(Box<dyn Any + Send>);

impl DecodedArgs {
    pub fn new<T: Any + Send>(arguments: T) -> Self {
        Self(Box::new(arguments))
    }

    pub fn take<T: Any>(self) -> Result<T> {
        self.0
            .downcast::<T>()
            .map(|arguments| *arguments)
            .map_err(|_| Error::DecodedArgumentsMismatch { expected: std::any::type_name::<T>() })
    }
}

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returned {
    Void,
    Value(Vec<u8>),
}

impl Returned {
    pub fn encode<T: WireType>(serialiser: &Serialiser, value: &T) -> serialiser::Result<Self> {
        Ok(Self::Value(serialiser.serialise(value)?))
    }
}

pub type DecodeFn = fn(&Serialiser, &[Vec<u8>]) -> Result<DecodedArgs>;
pub type CallFn<S> = fn(Arc<S>, DecodedArgs, Serialiser) -> BoxFuture<'static, anyhow::Result<Returned>>;

pub struct MethodEntry<S: ?Sized> {
    pub name: &'static str,
    pub parameter_types: Vec<TypeDescriptor>,
    pub decode: DecodeFn,
    pub call: CallFn<S>,
}

impl<S: ?Sized> MethodEntry<S> {
    pub fn new(
        name: &'static str,
        parameter_types: Vec<TypeDescriptor>,
        decode: DecodeFn,
        call: CallFn<S>,
    ) -> Self {
        Self { name, parameter_types, decode, call }
    }
}

type MethodKey = (String, Vec<TypeDescriptor>);

/// Inbound dispatch table for one interface.
pub struct MethodTable<S: ?Sized> {
    descriptor: TypeDescriptor,
    entries: Vec<MethodEntry<S>>,
    index: HashMap<MethodKey, usize>,
}

impl<S: ?Sized> MethodTable<S> {
    pub fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, entry: MethodEntry<S>) -> Result<()> {
        let key = (entry.name.to_string(), entry.parameter_types.clone());
        if self.index.contains_key(&key) {
            return Err(Error::AmbiguousOverload {
                service: self.descriptor.name.clone(),
                method: entry.name.to_string(),
            });
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn find(&self, name: &str, parameter_types: &[TypeDescriptor]) -> Result<usize> {
        self.index
            .get(&(name.to_string(), parameter_types.to_vec()))
            .copied()
            .ok_or_else(|| Error::MethodNotFound {
                service: self.descriptor.name.clone(),
                method: name.to_string(),
                parameter_types: parameter_types.iter().map(ToString::to_string).collect(),
            })
    }

    pub fn entry(&self, index: usize) -> Result<&MethodEntry<S>> {
        self.entries.get(index).ok_or(Error::NoSuchMethod(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Instance of a service, as `Box<Arc<dyn S>>` behind `Any`.
pub type ErasedService = Box<dyn Any + Send>;

/// Object-safe view of a [`MethodTable`], stored in the type registry.
pub trait InterfaceBinding: Send + Sync + 'static {
    fn descriptor(&self) -> &TypeDescriptor;
    fn rust_name(&self) -> &'static str;
    fn interface_id(&self) -> TypeId;
    fn find(&self, name: &str, parameter_types: &[TypeDescriptor]) -> Result<usize>;
    fn decode(&self, method: usize, serialiser: &Serialiser, arguments: &[Vec<u8>]) -> Result<DecodedArgs>;
    fn call(
        &self,
        method: usize,
        instance: ErasedService,
        arguments: DecodedArgs,
        serialiser: Serialiser,
    ) -> Result<BoxFuture<'static, anyhow::Result<Returned>>>;
}

impl<S: Service + ?Sized> InterfaceBinding for MethodTable<S> {
    fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn rust_name(&self) -> &'static str {
        S::interface_name()
    }

    fn interface_id(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn find(&self, name: &str, parameter_types: &[TypeDescriptor]) -> Result<usize> {
        MethodTable::find(self, name, parameter_types)
    }

    fn decode(&self, method: usize, serialiser: &Serialiser, arguments: &[Vec<u8>]) -> Result<DecodedArgs> {
        (self.entry(method)?.decode)(serialiser, arguments)
    }

    fn call(
        &self,
        method: usize,
        instance: ErasedService,
        arguments: DecodedArgs,
        serialiser: Serialiser,
    ) -> Result<BoxFuture<'static, anyhow::Result<Returned>>> {
        let entry = self.entry(method)?;
        let instance = instance
            .downcast::<Arc<S>>()
            .map_err(|_| Error::InstanceMismatch { expected: S::interface_name() })?;
        Ok((entry.call)(*instance, arguments, serialiser))
    }
}

/// Builds the registry binding for `S`.
pub fn bind_interface<S: Service + ?Sized>() -> Result<Arc<dyn InterfaceBinding>> {
    Ok(Arc::new(S::method_table()?))
}

pub fn expect_arity(arguments: &[Vec<u8>], expected: usize) -> Result<()> {
    if arguments.len() != expected {
        return Err(Error::ArgumentCount { expected, found: arguments.len() });
    }
    Ok(())
}

pub fn decode_argument<T: WireType>(serialiser: &Serialiser, arguments: &[Vec<u8>], index: usize) -> Result<T> {
    let bytes = arguments
        .get(index)
        .ok_or(Error::ArgumentCount { expected: index + 1, found: arguments.len() })?;
    serialiser
        .deserialise::<T>(bytes)
        .map_err(|source| Error::Argument { index, source })
}
