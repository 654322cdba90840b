//! Lifecycle tests: finalization, completion, errors and disposal
//!
//! Tests the subject lifecycle including:
//! - Finalization when the backing state completes
//! - Caller-driven completion and errors
//! - Persistence failures
//! - Teardown when the encryptor stream completes or the subject is dropped

use std::sync::{Arc, atomic::Ordering};

use futures::StreamExt;
use sealed_state::{
    Error, SubjectDependencies, UserStateSubject,
    constraints::ConstraintSource,
    state::{MemoryUserState, ObjectKey, StateError, StateKey},
};

use crate::helpers::*;

#[tokio::test]
async fn test_finalization_fixes_last_value_once() {
    let store = MemoryUserState::new("alice", Some(foo_json("abcdef")));
    let (encryptors, stream) = feed();
    let truncate = Truncate::new(3);
    let fixes = Arc::clone(&truncate.fixes);
    let constraints = futures::stream::iter([Ok(ConstraintSource::fixed(truncate))]);
    let subject = UserStateSubject::new(
        StateKey::plain("finalized"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream).constraints(constraints.boxed()),
    );
    supply(&encryptors, "alice");
    let mut states = subject.subscribe();
    assert_eq!(next_value(&mut states).await, foo("abc"));

    // The store goes away without next() ever being called.
    store.complete();
    expect_end(&mut states).await;

    assert_eq!(fixes.load(Ordering::SeqCst), 1);
    assert_eq!(store.current(), Some(foo_json("abc")));
    assert!(subject.is_disposed());
}

#[tokio::test]
async fn test_finalization_writes_initial_value() {
    let store = MemoryUserState::new("alice", None);
    let (encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        ObjectKey::plain("defaults").with_initial(foo("default")).into(),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    supply(&encryptors, "alice");
    let mut states = subject.subscribe();
    assert_eq!(next_value(&mut states).await, foo("default"));

    store.complete();
    expect_end(&mut states).await;
    assert_eq!(store.current(), Some(foo_json("default")));
}

#[tokio::test]
async fn test_finalization_respects_should_update() {
    let store = MemoryUserState::new("alice", Some(foo_json("kept")));
    let (encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("finalized"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream)
            .should_update(|prev, pending, _| prev != Some(pending))
            .next_value(|_, _, _| foo("replaced")),
    );
    supply(&encryptors, "alice");
    let mut states = subject.subscribe();
    assert_eq!(next_value(&mut states).await, foo("kept"));

    // The fixed value equals the stored one, so nothing is written.
    store.complete();
    expect_end(&mut states).await;
    assert_eq!(store.current(), Some(foo_json("kept")));
}

#[tokio::test]
async fn test_complete_ends_subscribers() {
    let store = MemoryUserState::new("alice", Some(foo_json("init")));
    let (_encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("completed"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let mut states = subject.subscribe();
    assert_eq!(next_value(&mut states).await, foo("init"));

    subject.complete();
    expect_end(&mut states).await;
    assert!(subject.is_disposed());

    // Every entry point is a no-op from now on.
    subject.next(foo("ignored"));
    subject.error(StateError::UpdateFailed {
        key: "completed".to_string(),
        reason: "ignored".to_string(),
    }
    .into());
    subject.complete();
    settle().await;
    assert_eq!(store.current(), Some(foo_json("init")));

    // Late subscribers see the last value, then completion.
    let mut late = subject.subscribe();
    assert_eq!(next_value(&mut late).await, foo("init"));
    expect_end(&mut late).await;
}

#[tokio::test]
async fn test_error_reaches_every_subscriber_once() {
    let store = MemoryUserState::new("alice", None);
    let (_encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("failed"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let mut first = subject.subscribe();
    let mut second = subject.with_constraints();

    subject.error(
        StateError::UpdateFailed {
            key: "failed".to_string(),
            reason: "injected".to_string(),
        }
        .into(),
    );

    for err in [expect_error(&mut first).await, expect_error(&mut second).await] {
        match err {
            Error::State(e) => assert_eq!(e.key(), "failed"),
            other => panic!("unexpected error: {other}"),
        }
    }
    expect_end(&mut first).await;
    expect_end(&mut second).await;
    assert!(subject.is_disposed());
}

#[tokio::test]
async fn test_persistence_failure_fails_subject() {
    let store = RejectingState::new("alice", Some(foo_json("init")));
    let (encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("rejected"),
        Arc::new(store),
        SubjectDependencies::<Foo>::bound(stream),
    );
    supply(&encryptors, "alice");
    let mut states = subject.subscribe();

    subject.next(foo("write"));
    let err = expect_error(&mut states).await;
    assert!(err.is_state_error(), "unexpected error: {err}");
    assert!(subject.is_disposed());
}

#[tokio::test]
async fn test_encryptor_completion_tears_down_subject() {
    let store = MemoryUserState::new("alice", Some(foo_json("init")));
    let (encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("teardown"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let mut states = subject.subscribe();
    supply(&encryptors, "alice");
    assert_eq!(next_value(&mut states).await, foo("init"));

    drop(encryptors);
    expect_end(&mut states).await;
    assert!(subject.is_disposed());
}

#[tokio::test]
async fn test_drop_disposes_subject() {
    let store = MemoryUserState::new("alice", Some(foo_json("init")));
    let (_encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("dropped"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let mut states = subject.subscribe();
    assert_eq!(next_value(&mut states).await, foo("init"));

    drop(subject);
    expect_end(&mut states).await;
}
