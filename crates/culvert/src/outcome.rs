//! Call outcomes and the errors a caller can observe.

use std::any::Any;

use qualname::ModuleIdentity;
use qualname::TypeDescriptor;
use serde::Deserialize;
use serde::Serialize;

use crate::dispatch::DispatchError;
use crate::serialiser;
use crate::serialiser::Serialiser;
use crate::wire::WireType;

/// A failure raised by the remote method, as it arrived over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl RemoteFault {
    pub const ERROR: &'static str = "error";
    pub const PANIC: &'static str = "panic";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Captures an error and its cause chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        if let Some(fault) = error.downcast_ref::<RemoteFault>() {
            return fault.clone();
        }
        Self {
            kind: Self::ERROR.to_string(),
            message: error.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "service method panicked".to_string()
        };
        Self::new(Self::PANIC, message)
    }

    pub fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(
            "RemoteFault",
            ModuleIdentity::new("culvert", "1.0.0.0", "neutral", "null"),
        )
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteFault {}

/// Why a call did not produce a value.
#[derive(Debug)]
pub enum CallError {
    /// The remote method failed.
    Fault(RemoteFault),
    /// No response arrived in time, or the peer went away.
    Canceled,
    /// The call could not be sent.
    Dispatch(DispatchError),
    /// The completion was awaited as the wrong type.
    ResultMismatch { expected: &'static str },
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fault(fault) => write!(f, "{}", fault),
            Self::Canceled => write!(f, "call canceled"),
            Self::Dispatch(e) => write!(f, "dispatch failed: {}", e),
            Self::ResultMismatch { expected } => write!(f, "call did not complete with a {}", expected),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fault(fault) => Some(fault),
            Self::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DispatchError> for CallError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

/// The single terminal state of a pending call.
pub enum Outcome {
    Void,
    Value(Box<dyn Any + Send>),
    Fault(CallError),
    Canceled,
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Void => write!(f, "Void"),
            Self::Value(_) => write!(f, "Value(..)"),
            Self::Fault(e) => write!(f, "Fault({:?})", e),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

type DecodeFn = fn(&Serialiser, &[u8]) -> serialiser::Result<Box<dyn Any + Send>>;

/// The expected result of a valued call, with the decoder for its callback payload.
#[derive(Clone)]
pub struct ResultType {
    pub descriptor: TypeDescriptor,
    pub rust_name: &'static str,
    decode: DecodeFn,
}

impl ResultType {
    pub fn of<T: WireType>() -> Self {
        Self {
            descriptor: T::descriptor(),
            rust_name: std::any::type_name::<T>(),
            decode: decode_boxed::<T>,
        }
    }

    pub fn decode(&self, serialiser: &Serialiser, bytes: &[u8]) -> serialiser::Result<Box<dyn Any + Send>> {
        (self.decode)(serialiser, bytes)
    }
}

impl std::fmt::Debug for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultType")
            .field("descriptor", &self.descriptor.to_string())
            .field("rust_name", &self.rust_name)
            .finish()
    }
}

fn decode_boxed<T: WireType>(serialiser: &Serialiser, bytes: &[u8]) -> serialiser::Result<Box<dyn Any + Send>> {
    Ok(Box::new(serialiser.deserialise::<T>(bytes)?))
}
