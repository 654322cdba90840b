use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, channel::mpsc};
use sealed_state::{
    Error, Result,
    constraints::{Constraints, FieldConstraint, StateConstraints},
    crypto::{EncryptedPayload, EncryptorProvider, UserBound, UserEncryptor},
    state::{BackingState, StateError, StateTransform, UserId},
    stream::{EventStream, ReplayChannel},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// How long to wait for something that should happen
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding that nothing will happen
pub const QUIET: Duration = Duration::from_millis(100);

// ==========================
// STATE
// ==========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Foo {
    pub foo: String,
}

pub fn foo(value: &str) -> Foo {
    Foo {
        foo: value.to_string(),
    }
}

pub fn foo_json(value: &str) -> Value {
    json!({ "foo": value })
}

/// A classified envelope as it sits in the backing store.
pub fn envelope(secret: Value, disclosed: Value) -> Value {
    json!({ "id": null, "secret": secret, "disclosed": disclosed })
}

// ==========================
// FEEDS
// ==========================

/// A stream the test pushes into. Dropping the sender completes the stream.
pub fn feed<T: Send + 'static>() -> (mpsc::UnboundedSender<Result<T>>, EventStream<T>) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.boxed())
}

pub type EncryptorFeed = mpsc::UnboundedSender<Result<UserBound<Arc<dyn UserEncryptor>>>>;

/// Push a stub encryptor for `user`, tagged with `user`.
pub fn supply(feed: &EncryptorFeed, user: &str) {
    supply_tagged(feed, user, stub_encryptor(user));
}

/// Push `encryptor`, tagged with `tag`.
pub fn supply_tagged(feed: &EncryptorFeed, tag: &str, encryptor: Arc<dyn UserEncryptor>) {
    feed.unbounded_send(Ok(UserBound::new(tag, encryptor)))
        .expect("encryptor feed closed");
}

// ==========================
// ENCRYPTORS
// ==========================

/// Encrypts `{foo: X}` to `{foo: "encrypt(X)"}` and decrypts `{foo: X}` to `{foo: "decrypt(X)"}`.
pub struct StubEncryptor {
    user_id: UserId,
}

fn rewrite(value: &Value, op: &str) -> Value {
    match value.get("foo").and_then(Value::as_str) {
        Some(inner) => json!({ "foo": format!("{op}({inner})") }),
        None => value.clone(),
    }
}

#[async_trait]
impl UserEncryptor for StubEncryptor {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn encrypt(&self, secret: Value) -> Result<EncryptedPayload> {
        Ok(EncryptedPayload::new(rewrite(&secret, "encrypt")))
    }

    async fn decrypt(&self, payload: &EncryptedPayload) -> Result<Value> {
        Ok(rewrite(payload.as_value(), "decrypt"))
    }
}

pub fn stub_encryptor(user: &str) -> Arc<dyn UserEncryptor> {
    Arc::new(StubEncryptor {
        user_id: UserId::from(user),
    })
}

/// Hands out stub encryptors for any user id.
pub struct StubProvider;

#[async_trait]
impl EncryptorProvider for StubProvider {
    async fn encryptor_for(&self, user_id: &UserId) -> Result<Arc<dyn UserEncryptor>> {
        Ok(stub_encryptor(user_id.as_str()))
    }
}

// ==========================
// BACKING STATES
// ==========================

/// A backing state that rejects every update.
pub struct RejectingState {
    user_id: UserId,
    live: ReplayChannel<Option<Value>>,
}

impl RejectingState {
    pub fn new(user: &str, initial: Option<Value>) -> Self {
        Self {
            user_id: UserId::from(user),
            live: ReplayChannel::with_value(initial),
        }
    }
}

#[async_trait]
impl BackingState for RejectingState {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn state(&self) -> EventStream<Option<Value>> {
        self.live.subscribe()
    }

    async fn update(&self, _transform: StateTransform) -> Result<Option<Value>> {
        Err(StateError::UpdateFailed {
            key: "rejecting".to_string(),
            reason: "read-only store".to_string(),
        }
        .into())
    }
}

// ==========================
// CONSTRAINTS
// ==========================

/// Truncates `foo` to a maximum length and counts calls to `fix`.
pub struct Truncate {
    constraints: Constraints,
    max_length: usize,
    pub fixes: Arc<AtomicUsize>,
}

impl Truncate {
    pub fn new(max_length: usize) -> Self {
        let limit = FieldConstraint {
            max_length: Some(max_length),
            ..Default::default()
        };
        Self {
            constraints: Constraints::from([("foo".to_string(), limit)]),
            max_length,
            fixes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StateConstraints<Foo> for Truncate {
    fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn adjust(&self, state: Foo) -> Foo {
        Foo {
            foo: state.foo.chars().take(self.max_length).collect(),
        }
    }

    fn fix(&self, state: Foo) -> Foo {
        self.fixes.fetch_add(1, Ordering::SeqCst);
        self.adjust(state)
    }
}

// ==========================
// STREAM ASSERTIONS
// ==========================

/// The next item, failing the test on timeout or completion.
pub async fn next_item<T>(stream: &mut EventStream<T>) -> Result<T> {
    tokio::time::timeout(TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for an item")
        .expect("stream completed unexpectedly")
}

/// The next value, failing the test on an error.
pub async fn next_value<T>(stream: &mut EventStream<T>) -> T {
    next_item(stream).await.expect("stream failed unexpectedly")
}

/// Skip values until one satisfies `pred`.
pub async fn wait_for<T: Debug>(stream: &mut EventStream<T>, pred: impl Fn(&T) -> bool) -> T {
    loop {
        let value = next_value(stream).await;
        if pred(&value) {
            return value;
        }
    }
}

/// Skip values until the stream fails.
pub async fn expect_error<T: Debug>(stream: &mut EventStream<T>) -> Error {
    loop {
        if let Err(e) = next_item(stream).await {
            return e;
        }
    }
}

/// Skip values until the stream completes.
pub async fn expect_end<T: Debug>(stream: &mut EventStream<T>) {
    tokio::time::timeout(TIMEOUT, async {
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                panic!("stream failed instead of completing: {e}");
            }
        }
    })
    .await
    .expect("timed out waiting for completion");
}

/// Assert that nothing arrives for a while.
pub async fn expect_silence<T: Debug>(stream: &mut EventStream<T>) {
    if let Ok(item) = tokio::time::timeout(QUIET, stream.next()).await {
        panic!("expected no emission, got {item:?}");
    }
}

/// Let the subject's tasks run.
pub async fn settle() {
    tokio::time::sleep(QUIET).await;
}
