//! # Callback Registry
//!
//! Tracks in-flight outbound calls by correlation id and completes each one exactly once.
//!
//! ## Invariants
//!
//! - **Single Assignment**: a pending call ends in exactly one of value, void, fault or
//!   canceled. The completion sender is moved out of the map under the entry's shard
//!   lock, so a racing resolve and expiry cannot both fire.
//! - **Tombstones**: a finished call leaves a tombstone behind so a late `resolve` or
//!   `reject` reports "already completed" rather than "unknown". Tombstones are purged
//!   by `clear_expired` once they are older than the call timeout.
//! - **Inclusive Expiry**: a call whose deadline equals `now` is expired.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::ids::ConnectionId;
use crate::ids::CorrelationId;
use crate::outcome::CallError;
use crate::outcome::Outcome;
use crate::outcome::ResultType;
use crate::wire::WireType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownCorrelationId(CorrelationId),
    AlreadyCompleted(CorrelationId),
    NoResultType(CorrelationId),
    DuplicateRegistration(CorrelationId),
    OwnerMismatch {
        id: CorrelationId,
        expected: Option<ConnectionId>,
        found: ConnectionId,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCorrelationId(id) => write!(f, "unknown correlation id {}", id),
            Self::AlreadyCompleted(id) => write!(f, "call {} already completed", id),
            Self::NoResultType(id) => write!(f, "could not get callback return type for {}", id),
            Self::DuplicateRegistration(id) => write!(f, "correlation id {} already registered", id),
            Self::OwnerMismatch { id, expected, found } => match expected {
                Some(expected) => write!(f, "call {} belongs to {}, not {}", id, expected, found),
                None => write!(f, "call {} has no owning connection, not {}", id, found),
            },
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

struct Pending {
    owner: Option<ConnectionId>,
    result_type: Option<ResultType>,
    tx: oneshot::Sender<Outcome>,
    /// `None` when the timeout reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

enum Slot {
    Pending(Pending),
    Completed { at: Instant },
}

pub struct CallbackRegistry {
    entries: DashMap<CorrelationId, Slot>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl CallbackRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a pending call. `None` for `result_type` means a void call.
    pub fn register(
        &self,
        id: CorrelationId,
        owner: Option<ConnectionId>,
        result_type: Option<ResultType>,
    ) -> Result<Completion> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(Error::DuplicateRegistration(id)),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending(Pending {
                    owner,
                    result_type,
                    tx,
                    expires_at: self.clock.now().checked_add(self.timeout),
                }));
                Ok(Completion { id, rx })
            }
        }
    }

    pub fn register_call(&self, id: CorrelationId, owner: Option<ConnectionId>) -> Result<Completion> {
        self.register(id, owner, None)
    }

    pub fn register_typed_call<T: WireType>(
        &self,
        id: CorrelationId,
        owner: Option<ConnectionId>,
    ) -> Result<CompletionHandle<T>> {
        let inner = self.register(id, owner, Some(ResultType::of::<T>()))?;
        Ok(CompletionHandle {
            inner,
            _marker: PhantomData,
        })
    }

    /// Completes a call with a value, or as void when `value` is `None`.
    pub fn resolve(
        &self,
        id: CorrelationId,
        value: Option<Box<dyn Any + Send>>,
        owner: Option<ConnectionId>,
    ) -> Result<()> {
        let outcome = match value {
            Some(value) => Outcome::Value(value),
            None => Outcome::Void,
        };
        self.complete(id, owner, outcome)
    }

    pub fn reject(&self, id: CorrelationId, error: CallError, owner: Option<ConnectionId>) -> Result<()> {
        self.complete(id, owner, Outcome::Fault(error))
    }

    pub fn result_type(&self, id: CorrelationId) -> Result<Option<ResultType>> {
        match self.entries.get(&id).as_deref() {
            Some(Slot::Pending(pending)) => Ok(pending.result_type.clone()),
            Some(Slot::Completed { .. }) => Err(Error::AlreadyCompleted(id)),
            None => Err(Error::NoResultType(id)),
        }
    }

    fn complete(&self, id: CorrelationId, owner: Option<ConnectionId>, outcome: Outcome) -> Result<()> {
        let now = self.clock.now();
        let pending = {
            let mut slot = self
                .entries
                .get_mut(&id)
                .ok_or(Error::UnknownCorrelationId(id))?;

            let Slot::Pending(pending) = &*slot else {
                return Err(Error::AlreadyCompleted(id));
            };
            if let Some(found) = owner {
                if pending.owner != Some(found) {
                    return Err(Error::OwnerMismatch {
                        id,
                        expected: pending.owner,
                        found,
                    });
                }
            }

            match std::mem::replace(&mut *slot, Slot::Completed { at: now }) {
                Slot::Pending(pending) => pending,
                Slot::Completed { .. } => return Err(Error::AlreadyCompleted(id)),
            }
        };

        // The caller may have stopped waiting; that is not an error.
        let _ = pending.tx.send(outcome);
        Ok(())
    }

    /// Cancels every call past its deadline and purges old tombstones.
    ///
    /// Returns the number of calls canceled.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired = Vec::new();

        self.entries.retain(|_, slot| {
            if matches!(slot, Slot::Pending(p) if p.expires_at.is_some_and(|at| at <= now)) {
                if let Slot::Pending(pending) = std::mem::replace(slot, Slot::Completed { at: now }) {
                    expired.push(pending.tx);
                }
                return true;
            }
            match slot {
                Slot::Pending(_) => true,
                Slot::Completed { at } => now.saturating_duration_since(*at) < self.timeout,
            }
        });

        let count = expired.len();
        for tx in expired {
            let _ = tx.send(Outcome::Canceled);
        }
        count
    }

    /// Cancels every pending call owned by `connection`.
    pub fn cancel_owned_by(&self, connection: ConnectionId) -> usize {
        let now = self.clock.now();
        let mut canceled = Vec::new();

        for mut slot in self.entries.iter_mut() {
            let owned = matches!(&*slot, Slot::Pending(p) if p.owner == Some(connection));
            if owned {
                if let Slot::Pending(pending) = std::mem::replace(&mut *slot, Slot::Completed { at: now }) {
                    canceled.push(pending.tx);
                }
            }
        }

        let count = canceled.len();
        for tx in canceled {
            let _ = tx.send(Outcome::Canceled);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Pending(_)))
            .count()
    }
}

/// Awaitable completion of one call, resolving to its [`Outcome`].
///
/// Dropping it does not cancel the call; the registry entry still completes or expires.
#[derive(Debug)]
pub struct Completion {
    id: CorrelationId,
    rx: oneshot::Receiver<Outcome>,
}

impl Completion {
    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    /// Awaits a value of type `T`.
    pub async fn value<T: Any>(self) -> std::result::Result<T, CallError> {
        match self.await {
            Outcome::Value(value) => value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| CallError::ResultMismatch { expected: std::any::type_name::<T>() }),
            Outcome::Void => Err(CallError::ResultMismatch { expected: std::any::type_name::<T>() }),
            Outcome::Fault(error) => Err(error),
            Outcome::Canceled => Err(CallError::Canceled),
        }
    }

    /// Awaits a void completion.
    pub async fn void(self) -> std::result::Result<(), CallError> {
        match self.await {
            Outcome::Void => Ok(()),
            Outcome::Value(_) => Err(CallError::ResultMismatch { expected: "()" }),
            Outcome::Fault(error) => Err(error),
            Outcome::Canceled => Err(CallError::Canceled),
        }
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The registry was dropped with the call still pending.
            Poll::Ready(Err(_)) => Poll::Ready(Outcome::Canceled),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A [`Completion`] that yields a `T`.
#[derive(Debug)]
pub struct CompletionHandle<T> {
    inner: Completion,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CompletionHandle<T> {
    pub fn correlation_id(&self) -> CorrelationId {
        self.inner.id
    }
}

impl<T: Any> Future for CompletionHandle<T> {
    type Output = std::result::Result<T, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(outcome) => outcome,
            Poll::Pending => return Poll::Pending,
        };
        let expected = std::any::type_name::<T>();
        Poll::Ready(match outcome {
            Outcome::Value(value) => value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| CallError::ResultMismatch { expected }),
            Outcome::Void => Err(CallError::ResultMismatch { expected }),
            Outcome::Fault(error) => Err(error),
            Outcome::Canceled => Err(CallError::Canceled),
        })
    }
}

#[cfg(test)]
mod tests;
