//! In-memory backing state.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{BackingState, StateTransform, UserId};
use crate::{
    Result,
    stream::{EventStream, ReplayChannel},
};

/// A [`BackingState`] held in memory.
///
/// Suitable for tests and for state that does not need to outlive the process.
/// Updates are serialized with an async mutex so transforms never interleave.
/// Clones share the same slot.
#[derive(Clone, Debug)]
pub struct MemoryUserState {
    user_id: UserId,
    current: Arc<Mutex<Option<Value>>>,
    live: ReplayChannel<Option<Value>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryUserState {
    /// Create a slot for `user_id` holding `initial`.
    pub fn new(user_id: impl Into<UserId>, initial: Option<Value>) -> Self {
        Self {
            user_id: user_id.into(),
            current: Arc::new(Mutex::new(initial.clone())),
            live: ReplayChannel::with_value(initial),
            writer: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The stored value.
    pub fn current(&self) -> Option<Value> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// End the live stream, as a store does when the slot is torn down.
    ///
    /// Updates are still accepted and visible through [`current`](Self::current).
    pub fn complete(&self) {
        self.live.complete();
    }
}

#[async_trait]
impl BackingState for MemoryUserState {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn state(&self) -> EventStream<Option<Value>> {
        self.live.subscribe()
    }

    async fn update(&self, transform: StateTransform) -> Result<Option<Value>> {
        let _guard = self.writer.lock().await;
        let next = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            let next = transform(current.take());
            *current = next.clone();
            next
        };
        trace!(user_id = %self.user_id, "memory state updated");
        if self.live.next(next.clone()).is_err() {
            trace!(user_id = %self.user_id, "live stream closed; update not published");
        }
        Ok(next)
    }
}
