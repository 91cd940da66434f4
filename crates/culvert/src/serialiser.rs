//! # Serialisation Gate
//!
//! Layers the allow-list over a [`Codec`]. Nothing is encoded or decoded unless its
//! type identifier resolves under `Purpose::SERIALISABLE`, which closes the door on
//! payloads naming types the peer never agreed to exchange.
//!
//! ## Invariants
//!
//! - Open generic identifiers are never accepted as payload types.
//! - Generic arguments are checked recursively. When a type is allowed through an
//!   open (or partially bound) registration, the arguments that registration leaves
//!   unspecified must be allowed in their own right.
//! - A decoded payload whose type differs from the expected type is a type mismatch.

use std::sync::Arc;

use qualname::TypeDescriptor;

use crate::codec;
use crate::codec::Codec;
use crate::codec::Tagged;
use crate::outcome::RemoteFault;
use crate::registry::Purpose;
use crate::registry::TypeRegistry;
use crate::wire::WireType;

pub const FAULT_REPLACED: &str = "Original fault not serialisable, replaced.";

#[derive(Debug)]
pub enum Error {
    Codec(codec::Error),
    Json(serde_json::Error),
    Identifier(qualname::Error),
    OpenType(String),
    NotSerialisable(String),
    TypeMismatch { expected: String, found: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec: {}", e),
            Self::Json(e) => write!(f, "payload shape: {}", e),
            Self::Identifier(e) => write!(f, "payload type identifier: {}", e),
            Self::OpenType(t) => write!(f, "open generic type '{}' cannot be a payload", t),
            Self::NotSerialisable(t) => write!(f, "type '{}' is not registered as serialisable", t),
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected '{}', found '{}'", expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<qualname::Error> for Error {
    fn from(e: qualname::Error) -> Self {
        Self::Identifier(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
pub struct Serialiser {
    codec: Arc<dyn Codec>,
    types: Arc<TypeRegistry>,
}

impl Serialiser {
    pub fn new(codec: Arc<dyn Codec>, types: Arc<TypeRegistry>) -> Self {
        Self { codec, types }
    }

    pub fn serialise<T: WireType>(&self, value: &T) -> Result<Vec<u8>> {
        let descriptor = T::descriptor();
        self.check(&descriptor)?;
        let tagged = Tagged {
            type_name: descriptor.to_string(),
            value: serde_json::to_value(value)?,
        };
        Ok(self.codec.encode(&tagged)?)
    }

    pub fn deserialise<T: WireType>(&self, bytes: &[u8]) -> Result<T> {
        let tagged = self.codec.decode(bytes)?;
        let found = TypeDescriptor::parse(&tagged.type_name)?;
        self.check(&found)?;

        let expected = T::descriptor();
        if found != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                found: tagged.type_name,
            });
        }
        Ok(serde_json::from_value(tagged.value)?)
    }

    /// Fails unless `descriptor` may appear in a payload.
    pub fn check(&self, descriptor: &TypeDescriptor) -> Result<()> {
        if !descriptor.is_fully_bound() {
            return Err(Error::OpenType(descriptor.to_string()));
        }
        let entry = self
            .types
            .resolve_descriptor(Purpose::SERIALISABLE, descriptor)
            .map_err(|_| Error::NotSerialisable(descriptor.to_string()))?;

        let covered = entry.descriptor.generic_arguments.len();
        for argument in &descriptor.generic_arguments[covered..] {
            self.check(argument)?;
        }
        Ok(())
    }

    /// Encodes a fault. Falls back to a generic fault when this one cannot be encoded.
    pub fn serialise_fault(&self, error: &anyhow::Error) -> Result<Vec<u8>> {
        let fault = RemoteFault::from_error(error);
        self.encode_fault(&fault).or_else(|e| {
            tracing::warn!(error = %e, "fault not serialisable, replacing");
            let mut replacement = RemoteFault::new(RemoteFault::ERROR, FAULT_REPLACED);
            replacement.causes.push(fault.message);
            self.encode_fault(&replacement)
        })
    }

    pub fn encode_fault(&self, fault: &RemoteFault) -> Result<Vec<u8>> {
        let tagged = Tagged {
            type_name: RemoteFault::descriptor().to_string(),
            value: serde_json::to_value(fault)?,
        };
        Ok(self.codec.encode(&tagged)?)
    }

    pub fn deserialise_fault(&self, bytes: &[u8]) -> Result<RemoteFault> {
        let tagged = self.codec.decode(bytes)?;
        let expected = RemoteFault::descriptor().to_string();
        if tagged.type_name != expected {
            return Err(Error::TypeMismatch {
                expected,
                found: tagged.type_name,
            });
        }
        Ok(serde_json::from_value(tagged.value)?)
    }
}
