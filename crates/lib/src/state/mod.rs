//! Backing state: the persistent per-user slot a subject reads and writes.
//!
//! The store itself is external. This module defines the contract it must satisfy
//! ([`BackingState`]), the key descriptors that select a storage format, and an
//! in-memory implementation ([`MemoryUserState`]).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Result, stream::EventStream};

mod errors;
mod key;
mod memory;

pub use errors::StateError;
pub use key::{ClassificationFormat, ClearOn, KeyOptions, ObjectKey, StateKey};
pub use memory::MemoryUserState;

/// Bounds required of a subject's state type.
///
/// State crosses task boundaries and is serialized before it leaves the process,
/// which doubles as a deep copy that strips anything non-portable.
pub trait StateValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Identifies the user a piece of state belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A transform applied to the stored value by [`BackingState::update`].
pub type StateTransform = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;

/// A persistent slot holding one key for one user.
///
/// Implementations must serialize concurrent [`update`](Self::update) calls: two
/// transforms for the same slot never interleave.
#[async_trait]
pub trait BackingState: Send + Sync {
    /// The user this slot belongs to. Never changes.
    fn user_id(&self) -> &UserId;

    /// Live stream of the stored value, starting with the current one.
    ///
    /// `None` means nothing is stored. The stream completes when the slot is torn down.
    fn state(&self) -> EventStream<Option<Value>>;

    /// Replace the stored value with `transform(current)` and return the new value.
    async fn update(&self, transform: StateTransform) -> Result<Option<Value>>;
}
