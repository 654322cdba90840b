//! Identity guard tests: a subject never straddles two users
//!
//! Tests identity handling including:
//! - Encryptors tagged for another user
//! - Encryptors whose key material belongs to another user
//! - Encryptors resolved from a user id stream

use std::sync::Arc;

use sealed_state::{
    SubjectDependencies, UserStateSubject,
    state::{MemoryUserState, StateKey, UserId},
    subject::SubjectError,
};

use crate::helpers::*;

fn plain_subject(store: &MemoryUserState, deps: SubjectDependencies<Foo>) -> UserStateSubject<Foo> {
    UserStateSubject::new(StateKey::plain("identity"), Arc::new(store.clone()), deps)
}

#[tokio::test]
async fn test_subject_is_bound_to_store_user() {
    let store = MemoryUserState::new("U1", None);
    let (_encryptors, stream) = feed();
    let subject = plain_subject(&store, SubjectDependencies::bound(stream));

    assert_eq!(subject.user_id(), &UserId::from("U1"));
    assert_eq!(subject.key(), "identity");
}

#[tokio::test]
async fn test_encryptor_for_other_user_fails_subject() {
    let store = MemoryUserState::new("U1", Some(foo_json("init")));
    let (encryptors, stream) = feed();
    let subject = plain_subject(&store, SubjectDependencies::bound(stream));
    let mut states = subject.subscribe();

    supply(&encryptors, "U2");

    let err = expect_error(&mut states).await;
    assert!(err.is_identity_error());
    match err {
        sealed_state::Error::Subject(SubjectError::UserIdMismatch {
            expected_user_id,
            actual_user_id,
        }) => {
            assert_eq!(expected_user_id, UserId::from("U1"));
            assert_eq!(actual_user_id, UserId::from("U2"));
        }
        other => panic!("expected a user id mismatch, got {other}"),
    }

    // Nothing is delivered after the error and the subject is gone.
    expect_end(&mut states).await;
    assert!(subject.is_disposed());

    subject.next(foo("after"));
    settle().await;
    assert_eq!(store.current(), Some(foo_json("init")));
}

#[tokio::test]
async fn test_late_subscriber_sees_identity_error() {
    let store = MemoryUserState::new("U1", None);
    let (encryptors, stream) = feed();
    let subject = plain_subject(&store, SubjectDependencies::bound(stream));

    supply(&encryptors, "U2");
    settle().await;

    let mut late = subject.subscribe();
    assert!(expect_error(&mut late).await.is_identity_error());
}

#[tokio::test]
async fn test_tag_cannot_hide_foreign_encryptor() {
    let store = MemoryUserState::new("U1", None);
    let (encryptors, stream) = feed();
    let subject = plain_subject(&store, SubjectDependencies::bound(stream));
    let mut states = subject.subscribe();

    // Tagged for U1, but holding U2's keys.
    supply_tagged(&encryptors, "U1", stub_encryptor("U2"));

    let err = expect_error(&mut states).await;
    assert!(err.is_identity_error(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_switching_user_mid_session_fails_subject() {
    let store = MemoryUserState::new("U1", None);
    let (encryptors, stream) = feed();
    let subject = plain_subject(&store, SubjectDependencies::bound(stream));
    let mut states = subject.subscribe();

    supply(&encryptors, "U1");
    subject.next(foo("first"));
    assert_eq!(next_value(&mut states).await, foo("first"));

    supply(&encryptors, "U2");
    assert!(expect_error(&mut states).await.is_identity_error());

    subject.next(foo("second"));
    settle().await;
    assert_eq!(store.current(), Some(foo_json("first")));
}

#[tokio::test]
async fn test_user_id_stream_resolves_encryptor() {
    let store = MemoryUserState::new("U1", None);
    let (user_ids, stream) = feed();
    let subject = plain_subject(
        &store,
        SubjectDependencies::for_user(stream, Arc::new(StubProvider)),
    );
    let mut states = subject.subscribe();

    subject.next(foo("pending"));
    settle().await;
    assert_eq!(store.current(), None, "nothing is written before the user is known");

    user_ids.unbounded_send(Ok(UserId::from("U1"))).unwrap();
    assert_eq!(next_value(&mut states).await, foo("pending"));
    assert_eq!(store.current(), Some(foo_json("pending")));

    user_ids.unbounded_send(Ok(UserId::from("U3"))).unwrap();
    let err = expect_error(&mut states).await;
    assert!(err.is_identity_error());
}
