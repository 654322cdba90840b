//! Backing state tests: MemoryUserState behind subjects

use std::sync::Arc;

use futures::StreamExt;
use sealed_state::{
    SubjectDependencies, UserStateSubject,
    state::{BackingState, MemoryUserState, StateKey},
};
use serde_json::Value;

use crate::helpers::*;

#[tokio::test]
async fn test_subjects_sharing_a_store_see_each_others_writes() {
    let store = MemoryUserState::new("alice", Some(foo_json("init")));
    let (encryptors, stream) = feed();
    let (_other_encryptors, other_stream) = feed();
    let writer = UserStateSubject::new(
        StateKey::plain("shared"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let reader = UserStateSubject::new(
        StateKey::plain("shared"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(other_stream),
    );
    let mut observed = reader.subscribe();
    assert_eq!(next_value(&mut observed).await, foo("init"));

    supply(&encryptors, "alice");
    writer.next(foo("written"));
    assert_eq!(next_value(&mut observed).await, foo("written"));
}

#[tokio::test]
async fn test_external_updates_reach_subscribers() {
    let store = MemoryUserState::new("alice", None);
    let (_encryptors, stream) = feed();
    let subject = UserStateSubject::new(
        StateKey::plain("external"),
        Arc::new(store.clone()),
        SubjectDependencies::<Foo>::bound(stream),
    );
    let mut states = subject.subscribe();

    store
        .update(Box::new(|_: Option<Value>| Some(foo_json("from elsewhere"))))
        .await
        .unwrap();
    assert_eq!(next_value(&mut states).await, foo("from elsewhere"));
}

#[tokio::test]
async fn test_completed_store_replays_last_value() {
    let store = MemoryUserState::new("alice", Some(foo_json("last")));
    store.complete();

    let mut live = store.state();
    assert_eq!(next_value(&mut live).await, Some(foo_json("last")));
    assert!(live.next().await.is_none());
}
