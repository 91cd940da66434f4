use crate::callback;
use crate::frame;
use crate::ids::ConnectionId;
use crate::ids::CorrelationId;
use crate::method;
use crate::provider;
use crate::registry;
use crate::serialiser;
use crate::transport;

/// Failures while sending an outbound call. Surfaced to the caller.
#[derive(Debug)]
pub enum DispatchError {
    /// The client is not connected.
    NotConnected,
    /// The logical connection has no live transport connection behind it.
    NoLiveConnection(ConnectionId),
    Serialise(serialiser::Error),
    Frame(frame::Error),
    Callback(callback::Error),
    Transport(transport::Error),
    /// The invocation names a method its service shape does not have.
    UnknownMethod { service: &'static str, index: usize },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::NoLiveConnection(id) => write!(f, "no live connection for {}", id),
            Self::Serialise(e) => write!(f, "argument serialisation: {}", e),
            Self::Frame(e) => write!(f, "{}", e),
            Self::Callback(e) => write!(f, "callback registration: {}", e),
            Self::Transport(e) => write!(f, "transport: {}", e),
            Self::UnknownMethod { service, index } => {
                write!(f, "{} has no method at index {}", service, index)
            }
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialise(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::Callback(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serialiser::Error> for DispatchError {
    fn from(e: serialiser::Error) -> Self {
        Self::Serialise(e)
    }
}

impl From<frame::Error> for DispatchError {
    fn from(e: frame::Error) -> Self {
        Self::Frame(e)
    }
}

impl From<callback::Error> for DispatchError {
    fn from(e: callback::Error) -> Self {
        Self::Callback(e)
    }
}

impl From<transport::Error> for DispatchError {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

/// Why an inbound frame was dropped. Only ever logged.
#[derive(Debug)]
pub enum InboundError {
    Frame(frame::Error),
    Identifier(qualname::Error),
    Registry(registry::Error),
    NotAService(String),
    Provider(provider::Error),
    Method(method::Error),
    Serialise(serialiser::Error),
    Callback(callback::Error),
    /// A callback carried a payload for a call registered as void.
    ValueForVoidCall(CorrelationId),
    /// A callback carried no payload for a call expecting a value.
    MissingValue { id: CorrelationId, expected: &'static str },
}

impl std::fmt::Display for InboundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "{}", e),
            Self::Identifier(e) => write!(f, "parameter type: {}", e),
            Self::Registry(e) => write!(f, "{}", e),
            Self::NotAService(name) => write!(f, "'{}' is registered but is not a service interface", name),
            Self::Provider(e) => write!(f, "service resolution: {}", e),
            Self::Method(e) => write!(f, "{}", e),
            Self::Serialise(e) => write!(f, "{}", e),
            Self::Callback(e) => write!(f, "{}", e),
            Self::ValueForVoidCall(id) => write!(f, "valued callback for void call {}", id),
            Self::MissingValue { id, expected } => {
                write!(f, "non-valued callback for call {} expecting {}", id, expected)
            }
        }
    }
}

impl std::error::Error for InboundError {}

impl From<frame::Error> for InboundError {
    fn from(e: frame::Error) -> Self {
        Self::Frame(e)
    }
}

impl From<qualname::Error> for InboundError {
    fn from(e: qualname::Error) -> Self {
        Self::Identifier(e)
    }
}

impl From<registry::Error> for InboundError {
    fn from(e: registry::Error) -> Self {
        Self::Registry(e)
    }
}

impl From<provider::Error> for InboundError {
    fn from(e: provider::Error) -> Self {
        Self::Provider(e)
    }
}

impl From<method::Error> for InboundError {
    fn from(e: method::Error) -> Self {
        Self::Method(e)
    }
}

impl From<serialiser::Error> for InboundError {
    fn from(e: serialiser::Error) -> Self {
        Self::Serialise(e)
    }
}

impl From<callback::Error> for InboundError {
    fn from(e: callback::Error) -> Self {
        Self::Callback(e)
    }
}

/// Failures of `start`.
#[derive(Debug)]
pub enum ConnectionError {
    AlreadyConnected,
    AlreadyConnecting,
    CannotConnect(transport::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::AlreadyConnecting => write!(f, "already connecting"),
            Self::CannotConnect(e) => write!(f, "cannot connect: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CannotConnect(e) => Some(e),
            _ => None,
        }
    }
}
