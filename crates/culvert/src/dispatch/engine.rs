//! The protocol core shared by the client and the server drivers.
//!
//! Outbound, an [`Invocation`] becomes an encoded `Invoke` frame plus a registered
//! [`Completion`]. Inbound, an `Invoke` is bound to a service instance, run, and
//! answered with a `Callback`; a `Callback` completes the pending call it names.
//!
//! ## Failure Policy
//!
//! - Anything that goes wrong before an invoked method starts running is logged and
//!   the frame is dropped. The caller's pending call expires.
//! - Anything that goes wrong while the method runs, including a panic, is sent back
//!   as a fault.
//! - A callback that cannot be applied is logged and dropped. It never tears down
//!   the connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use qualname::TypeDescriptor;
use tracing::error;
use tracing::warn;

use crate::callback::CallbackRegistry;
use crate::callback::Completion;
use crate::codec::Codec;
use crate::dispatch::DispatchError;
use crate::dispatch::InboundError;
use crate::frame::Callback;
use crate::frame::Frame;
use crate::frame::Invoke;
use crate::ids::ConnectionId;
use crate::ids::CorrelationId;
use crate::method::Returned;
use crate::outcome::CallError;
use crate::outcome::RemoteFault;
use crate::provider::InterfaceId;
use crate::provider::ServiceSource;
use crate::proxy::Invocation;
use crate::registry::Purpose;
use crate::registry::TypeRegistry;
use crate::serialiser;
use crate::serialiser::Serialiser;

pub struct Engine {
    types: Arc<TypeRegistry>,
    callbacks: Arc<CallbackRegistry>,
    serialiser: Serialiser,
}

impl Engine {
    pub fn new(types: Arc<TypeRegistry>, callbacks: Arc<CallbackRegistry>, codec: Arc<dyn Codec>) -> Self {
        let serialiser = Serialiser::new(codec, types.clone());
        Self {
            types,
            callbacks,
            serialiser,
        }
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn serialiser(&self) -> &Serialiser {
        &self.serialiser
    }

    /// Encodes `invocation` and registers its pending call under `owner`.
    ///
    /// Nothing is registered if encoding fails.
    pub fn prepare(
        &self,
        invocation: Invocation,
        owner: Option<ConnectionId>,
    ) -> Result<(Vec<u8>, Completion), DispatchError> {
        let method = invocation.shape().ok_or(DispatchError::UnknownMethod {
            service: invocation.service.name,
            index: invocation.method,
        })?;

        let arguments = invocation
            .arguments
            .iter()
            .map(|argument| argument.encode(&self.serialiser))
            .collect::<serialiser::Result<Vec<_>>>()?;

        let correlation_id = CorrelationId::new();
        let payload = Frame::Invoke(Invoke {
            correlation_id,
            service: invocation.service.descriptor.to_string(),
            method: method.name.to_string(),
            parameter_types: method.parameter_types.iter().map(ToString::to_string).collect(),
            arguments,
        })
        .encode()?;

        let completion = self
            .callbacks
            .register(correlation_id, owner, method.result.clone())?;
        Ok((payload, completion))
    }

    /// Handles one inbound frame from `connection` (`None` on the client).
    ///
    /// Returns the encoded reply to send back, if any.
    pub async fn receive(
        &self,
        payload: &[u8],
        connection: Option<ConnectionId>,
        services: &dyn ServiceSource,
    ) -> Option<Vec<u8>> {
        let frame = match Frame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return None;
            }
        };

        match frame {
            Frame::Invoke(invoke) => self.invoke(invoke, connection, services).await,
            Frame::Callback(callback) => {
                let id = callback.correlation_id;
                if let Err(e) = self.complete(callback, connection) {
                    warn!(correlation_id = %id, error = %e, "dropping callback");
                }
                None
            }
        }
    }

    async fn invoke(
        &self,
        invoke: Invoke,
        connection: Option<ConnectionId>,
        services: &dyn ServiceSource,
    ) -> Option<Vec<u8>> {
        let correlation_id = invoke.correlation_id;
        let call = match self.bind(&invoke, connection, services) {
            Ok(call) => call,
            Err(e) => {
                error!(
                    %correlation_id,
                    service = %invoke.service,
                    method = %invoke.method,
                    error = %e,
                    "dropping invocation"
                );
                return None;
            }
        };

        let reply = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(Returned::Void)) => Ok(Callback::void(correlation_id)),
            Ok(Ok(Returned::Value(result))) => Ok(Callback::value(correlation_id, result)),
            Ok(Err(e)) => self
                .serialiser
                .serialise_fault(&e)
                .map(|fault| Callback::fault(correlation_id, fault)),
            Err(panic) => self
                .serialiser
                .encode_fault(&RemoteFault::from_panic(&*panic))
                .map(|fault| Callback::fault(correlation_id, fault)),
        };

        let encoded = reply
            .map_err(InboundError::from)
            .and_then(|callback| Ok(Frame::Callback(callback).encode()?));
        match encoded {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(%correlation_id, error = %e, "could not encode reply");
                None
            }
        }
    }

    /// Resolves everything an invocation needs, up to decoded arguments.
    fn bind(
        &self,
        invoke: &Invoke,
        connection: Option<ConnectionId>,
        services: &dyn ServiceSource,
    ) -> Result<BoxFuture<'static, anyhow::Result<Returned>>, InboundError> {
        let entry = self.types.resolve_name(Purpose::SERVICES, &invoke.service)?;
        let binding = entry
            .interface_binding()
            .ok_or_else(|| InboundError::NotAService(invoke.service.clone()))?;

        let interface = InterfaceId {
            type_id: binding.interface_id(),
            name: binding.rust_name(),
        };
        let instance = services.resolve(interface, connection)?;

        let parameter_types = invoke
            .parameter_types
            .iter()
            .map(|name| -> Result<TypeDescriptor, InboundError> {
                let descriptor = TypeDescriptor::parse(name)?;
                self.serialiser.check(&descriptor)?;
                Ok(descriptor)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let method = binding.find(&invoke.method, &parameter_types)?;
        let arguments = binding.decode(method, &self.serialiser, &invoke.arguments)?;
        Ok(binding.call(method, instance, arguments, self.serialiser.clone())?)
    }

    fn complete(&self, callback: Callback, connection: Option<ConnectionId>) -> Result<(), InboundError> {
        let id = callback.correlation_id;
        let result_type = self.callbacks.result_type(id)?;

        match (callback.result, callback.fault, result_type) {
            (_, Some(fault), _) => {
                let fault = self.serialiser.deserialise_fault(&fault)?;
                self.callbacks.reject(id, CallError::Fault(fault), connection)?;
            }
            (Some(result), None, Some(result_type)) => {
                let value = result_type.decode(&self.serialiser, &result)?;
                self.callbacks.resolve(id, Some(value), connection)?;
            }
            (Some(_), None, None) => return Err(InboundError::ValueForVoidCall(id)),
            (None, None, Some(result_type)) => {
                return Err(InboundError::MissingValue {
                    id,
                    expected: result_type.rust_name,
                });
            }
            (None, None, None) => self.callbacks.resolve(id, None, connection)?,
        }
        Ok(())
    }
}
