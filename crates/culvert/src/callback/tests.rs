//! Tests for the callback registry.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use super::*;
use crate::clock::ManualClock;
use crate::dispatch::DispatchError;

const TIMEOUT: Duration = Duration::from_secs(30);

fn registry() -> (CallbackRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (CallbackRegistry::with_clock(TIMEOUT, clock.clone()), clock)
}

#[tokio::test]
async fn test_resolve_completes_typed_call_once() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let handle = registry.register_typed_call::<String>(id, None).expect("register");

    registry
        .resolve(id, Some(Box::new("pong".to_string())), None)
        .expect("resolve");
    assert_eq!(handle.await.expect("value"), "pong");

    assert_eq!(
        registry.resolve(id, Some(Box::new("again".to_string())), None),
        Err(Error::AlreadyCompleted(id))
    );
    assert_eq!(registry.reject(id, CallError::Canceled, None), Err(Error::AlreadyCompleted(id)));
}

#[tokio::test]
async fn test_void_call_resolves_without_value() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let completion = registry.register_call(id, None).expect("register");
    assert!(registry.result_type(id).expect("pending").is_none());

    registry.resolve(id, None, None).expect("resolve");
    completion.void().await.expect("void");
}

#[tokio::test]
async fn test_reject_delivers_fault() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let completion = registry.register_call(id, None).expect("register");

    let fault = crate::outcome::RemoteFault::new("error", "boom");
    registry.reject(id, CallError::Fault(fault), None).expect("reject");

    match completion.void().await {
        Err(CallError::Fault(fault)) => assert_eq!(fault.message, "boom"),
        other => panic!("expected fault, got {:?}", other),
    }
}

#[test]
fn test_unknown_correlation_id() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    assert_eq!(registry.resolve(id, None, None), Err(Error::UnknownCorrelationId(id)));
    assert_eq!(registry.reject(id, CallError::Canceled, None), Err(Error::UnknownCorrelationId(id)));

    let err = registry.result_type(id).expect_err("no result type");
    assert_eq!(err, Error::NoResultType(id));
    assert!(err.to_string().contains("could not get callback return type"));
}

#[test]
fn test_duplicate_registration_is_refused() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let _first = registry.register_call(id, None).expect("register");
    assert!(matches!(registry.register_call(id, None), Err(Error::DuplicateRegistration(_))));
}

#[tokio::test]
async fn test_expiry_cancels_at_deadline() {
    let (registry, clock) = registry();
    let id = CorrelationId::new();
    let handle = registry.register_typed_call::<u32>(id, None).expect("register");

    clock.advance(TIMEOUT - Duration::from_millis(1));
    assert_eq!(registry.clear_expired(), 0);
    assert_eq!(registry.pending_count(), 1);

    clock.advance(Duration::from_millis(1));
    assert_eq!(registry.clear_expired(), 1);
    assert!(matches!(handle.await, Err(CallError::Canceled)));

    // late responses are refused, not delivered
    assert_eq!(
        registry.resolve(id, Some(Box::new(7u32)), None),
        Err(Error::AlreadyCompleted(id))
    );
}

#[tokio::test]
async fn test_resolved_call_is_unaffected_by_later_sweep() {
    let (registry, clock) = registry();
    let id = CorrelationId::new();
    let handle = registry.register_typed_call::<u32>(id, None).expect("register");
    registry.resolve(id, Some(Box::new(7u32)), None).expect("resolve");

    clock.advance(TIMEOUT * 2);
    assert_eq!(registry.clear_expired(), 0);
    assert_eq!(handle.await.expect("value"), 7);
}

#[tokio::test]
async fn test_unbounded_timeout_never_expires() {
    let clock = Arc::new(ManualClock::new());
    let registry = CallbackRegistry::with_clock(Duration::MAX, clock.clone());
    let id = CorrelationId::new();
    let handle = registry.register_typed_call::<u32>(id, None).expect("register");

    clock.advance(Duration::from_secs(24 * 60 * 60));
    assert_eq!(registry.clear_expired(), 0);
    assert_eq!(registry.pending_count(), 1);

    registry.resolve(id, Some(Box::new(9u32)), None).expect("resolve");
    assert_eq!(handle.await.expect("value"), 9);
}

#[test]
fn test_tombstones_are_purged_after_timeout() {
    let (registry, clock) = registry();
    let id = CorrelationId::new();
    let _completion = registry.register_call(id, None).expect("register");
    registry.resolve(id, None, None).expect("resolve");

    clock.advance(TIMEOUT);
    registry.clear_expired();
    assert_eq!(registry.resolve(id, None, None), Err(Error::UnknownCorrelationId(id)));
}

#[tokio::test]
async fn test_wrong_type_is_result_mismatch() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let handle = registry.register_typed_call::<String>(id, None).expect("register");
    registry.resolve(id, Some(Box::new(1u8)), None).expect("resolve");
    assert!(matches!(handle.await, Err(CallError::ResultMismatch { .. })));
}

#[tokio::test]
async fn test_owner_must_match() {
    let (registry, _) = registry();
    let owner = ConnectionId::new();
    let stranger = ConnectionId::new();
    let id = CorrelationId::new();
    let completion = registry.register_call(id, Some(owner)).expect("register");

    assert!(matches!(
        registry.resolve(id, None, Some(stranger)),
        Err(Error::OwnerMismatch { .. })
    ));
    registry.resolve(id, None, Some(owner)).expect("owner resolves");
    completion.void().await.expect("void");
}

#[tokio::test]
async fn test_cancel_owned_by_only_touches_that_connection() {
    let (registry, _) = registry();
    let gone = ConnectionId::new();
    let stays = ConnectionId::new();

    let a = registry.register_call(CorrelationId::new(), Some(gone)).expect("a");
    let b = registry.register_call(CorrelationId::new(), Some(gone)).expect("b");
    let c_id = CorrelationId::new();
    let c = registry.register_call(c_id, Some(stays)).expect("c");

    assert_eq!(registry.cancel_owned_by(gone), 2);
    assert!(matches!(a.await, Outcome::Canceled));
    assert!(matches!(b.await, Outcome::Canceled));

    registry.resolve(c_id, None, Some(stays)).expect("c resolves");
    assert!(matches!(c.await, Outcome::Void));
}

#[tokio::test]
async fn test_dispatch_failure_rejects_call() {
    let (registry, _) = registry();
    let id = CorrelationId::new();
    let completion = registry.register_call(id, None).expect("register");
    registry
        .reject(id, CallError::Dispatch(DispatchError::NotConnected), None)
        .expect("reject");
    assert!(matches!(
        completion.void().await,
        Err(CallError::Dispatch(DispatchError::NotConnected))
    ));
}

#[tokio::test]
async fn test_racing_resolve_and_expiry_complete_once() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(CallbackRegistry::with_clock(TIMEOUT, clock.clone()));

    let mut ids = Vec::new();
    let mut completions = Vec::new();
    for _ in 0..200 {
        let id = CorrelationId::new();
        completions.push(registry.register_call(id, None).expect("register"));
        ids.push(id);
    }
    ids.shuffle(&mut rand::thread_rng());
    clock.advance(TIMEOUT);

    let sweeper = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.clear_expired() })
    };
    let resolver = {
        let registry = registry.clone();
        tokio::spawn(async move {
            ids.into_iter()
                .filter(|id| registry.resolve(*id, None, None).is_ok())
                .count()
        })
    };

    let expired = sweeper.await.expect("sweeper");
    let resolved = resolver.await.expect("resolver");
    assert_eq!(expired + resolved, 200);

    let mut void = 0;
    let mut canceled = 0;
    for completion in completions {
        match completion.await {
            Outcome::Void => void += 1,
            Outcome::Canceled => canceled += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!((void, canceled), (resolved, expired));
}
