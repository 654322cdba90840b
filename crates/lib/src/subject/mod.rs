//! The user state subject.
//!
//! [`UserStateSubject`] adapts a [`BackingState`] slot into a multicast subject.
//! Two pipelines run for the lifetime of a subject:
//!
//! ```text
//! Output: store.state() → declassify → adjust → output channel → subscribers
//! Input:  next() → gate(when) → adjust → dependencies → update decision → classify → store.update()
//! ```
//!
//! When the store's live stream ends, the last output value is passed once through
//! `fix` and written through the same update decision (finalization). The input
//! pipeline is torn down when the gate, the input or the encryptor stream completes.
//!
//! A subject is single-use. The first error or completion disposes it: its tasks
//! are aborted and every later call to [`next`](UserStateSubject::next),
//! [`error`](UserStateSubject::error) or [`complete`](UserStateSubject::complete)
//! is a no-op.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{StreamExt, TryStreamExt, future, stream};
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    classify::StateCodec,
    constraints::{self, Constrained},
    state::{BackingState, StateKey, StateValue, UserId},
    stream::{EventStream, ReplayChannel, any_complete, gate, signal, take_until, with_latest_ready},
};

mod errors;
mod options;

pub use errors::SubjectError;
pub use options::{EncryptorSource, NextValue, ShouldUpdate, SubjectDependencies};

/// A candidate write on its way to the update decision.
enum Update<S> {
    /// A value pushed with `next`
    Next(S),
    /// The fixed value produced at finalization; always the last update
    Final(Option<S>),
}

enum Lifecycle<S> {
    Active {
        input: ReplayChannel<S>,
        tasks: Vec<JoinHandle<()>>,
    },
    Disposed,
}

/// State shared between a subject and the tasks driving its pipelines.
struct Shared<S> {
    key: String,
    output: ReplayChannel<Constrained<S>>,
    lifecycle: Mutex<Lifecycle<S>>,
}

impl<S: StateValue> Shared<S> {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle<S>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn input(&self) -> Option<ReplayChannel<S>> {
        match &*self.lifecycle() {
            Lifecycle::Active { input, .. } => Some(input.clone()),
            Lifecycle::Disposed => None,
        }
    }

    /// Tie `task` to the subject's lifetime.
    fn adopt(&self, task: JoinHandle<()>) {
        match &mut *self.lifecycle() {
            Lifecycle::Active { tasks, .. } => tasks.push(task),
            Lifecycle::Disposed => task.abort(),
        }
    }

    /// Tear the subject down. Returns `false` if it was already disposed.
    fn dispose(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Disposed);
        let Lifecycle::Active { input, tasks } = previous else {
            return false;
        };
        input.complete();
        for task in tasks {
            task.abort();
        }
        debug!(key = %self.key, "user state subject disposed");
        true
    }

    fn fail(&self, error: Error) {
        if self.output.is_closed() {
            return;
        }
        warn!(key = %self.key, module = error.module(), error = %error, "user state subject failed");
        self.output.error(error);
        self.dispose();
    }

    fn finish(&self) {
        self.output.complete();
        if self.dispose() {
            info!(key = %self.key, "user state subject completed");
        }
    }
}

/// A multicast subject over one user's persisted state.
///
/// Values pushed with [`next`](Self::next) are constrained, deduplicated, classified
/// and written to the backing store. Subscribers observe the store's value after
/// declassification and adjustment, starting with the latest one.
///
/// The subject is bound to the user of its backing store. Any encryptor that
/// belongs to another user fails the subject with
/// [`SubjectError::UserIdMismatch`].
///
/// Dropping the subject disposes it.
pub struct UserStateSubject<S: StateValue> {
    user_id: UserId,
    shared: Arc<Shared<S>>,
}

impl<S: StateValue> UserStateSubject<S> {
    /// Build a subject over `state`, stored under `key`.
    ///
    /// Spawns the pipeline tasks, so this must be called within a tokio runtime.
    pub fn new<D>(
        key: StateKey<S>,
        state: Arc<dyn BackingState>,
        dependencies: SubjectDependencies<S, D>,
    ) -> Self
    where
        D: Clone + Send + Sync + 'static,
    {
        let user_id = state.user_id().clone();
        let codec = StateCodec::from_key(&key);
        let name = key.name().to_string();
        let initial = key.initial().cloned();
        debug!(key = %name, user_id = %user_id, format = ?codec.format(), "creating user state subject");

        let SubjectDependencies {
            encryptor,
            when,
            constraints: rules,
            dependencies,
            should_update,
            next_value,
        } = dependencies;

        let input = ReplayChannel::new();
        let shared = Arc::new(Shared {
            key: name.clone(),
            output: ReplayChannel::new(),
            lifecycle: Mutex::new(Lifecycle::Active {
                input: input.clone(),
                tasks: Vec::new(),
            }),
        });

        let (when, task) = ReplayChannel::forward(when);
        shared.adopt(task);
        let (encryptor, task) = ReplayChannel::forward(encryptor.verified(user_id.clone()));
        shared.adopt(task);
        let (limits, task) = ReplayChannel::forward(constraints::recover(&name, rules));
        shared.adopt(task);
        let (dependencies, task) = ReplayChannel::forward(dependencies);
        shared.adopt(task);

        let (finalize_tx, finalize_rx) = oneshot::channel();

        let output = constraints::adjust(
            codec.declassify(state.state(), encryptor.subscribe()),
            limits.subscribe(),
            initial.clone(),
        );
        shared.adopt(tokio::spawn(publish(Arc::clone(&shared), output, finalize_tx)));

        let live = with_latest_ready(gate(input.subscribe(), when.subscribe()), limits.subscribe())
            .map_ok(|(pending, source)| Update::Next(source.calibrate(&pending).adjust(pending)))
            .boxed();
        let finalizing = constraints::fix(finalized(name.clone(), finalize_rx), limits.subscribe(), initial)
            .map_ok(|fixed| Update::Final(fixed.state))
            .boxed();
        let updates = with_latest_ready(stream::select(live, finalizing).boxed(), dependencies.subscribe());
        let decided = decide(updates, shared.output.clone(), should_update, next_value);
        let writes = take_until(
            codec.classify(decided, encryptor.subscribe()),
            any_complete(vec![
                signal(when.subscribe()),
                signal(input.subscribe()),
                signal(encryptor.subscribe()),
            ]),
        );
        shared.adopt(tokio::spawn(persist(Arc::clone(&shared), Arc::clone(&state), writes)));

        Self { user_id, shared }
    }

    /// The user this subject is bound to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The storage key.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Queue `value` for writing.
    ///
    /// The write happens asynchronously, once the gate, the constraints and the
    /// encryptor are ready. Ignored once the subject is disposed.
    pub fn next(&self, value: S) {
        if let Some(input) = self.shared.input() {
            let _ = input.next(value);
        }
    }

    /// Fail the subject with `error`. Ignored once the subject is disposed.
    pub fn error(&self, error: Error) {
        if let Some(input) = self.shared.input() {
            input.error(error);
        }
    }

    /// Complete the subject. Ignored once the subject is disposed.
    pub fn complete(&self) {
        if let Some(input) = self.shared.input() {
            input.complete();
        }
    }

    /// The latest state followed by every later state.
    ///
    /// Emissions without a state (nothing stored and no initial value) are skipped.
    pub fn subscribe(&self) -> EventStream<S> {
        self.shared
            .output
            .subscribe()
            .try_filter_map(|constrained| future::ready(Ok(constrained.state)))
            .boxed()
    }

    /// Like [`subscribe`](Self::subscribe), but each state comes with the
    /// constraints that were in force when it was adjusted.
    pub fn with_constraints(&self) -> EventStream<Constrained<S>> {
        self.shared.output.subscribe()
    }

    /// Whether the subject has been disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(*self.shared.lifecycle(), Lifecycle::Disposed)
    }
}

impl<S: StateValue> Drop for UserStateSubject<S> {
    fn drop(&mut self) {
        self.shared.output.complete();
        self.shared.dispose();
    }
}

/// Feed the output channel, then hand the last state over for finalization.
async fn publish<S: StateValue>(
    shared: Arc<Shared<S>>,
    mut output: EventStream<Constrained<S>>,
    finalize: oneshot::Sender<Option<S>>,
) {
    let mut last = None;
    while let Some(item) = output.next().await {
        match item {
            Ok(constrained) => {
                last = constrained.state.clone();
                if shared.output.next(constrained).is_err() {
                    return;
                }
            }
            Err(e) => {
                shared.fail(e);
                return;
            }
        }
    }
    debug!(key = %shared.key, "backing state completed, finalizing");
    let _ = finalize.send(last);
}

/// The value handed over by [`publish`], if the output ever completes.
fn finalized<S: StateValue>(key: String, finalize: oneshot::Receiver<Option<S>>) -> EventStream<Option<S>> {
    stream::once(finalize)
        .filter_map(move |handed_over| {
            if handed_over.is_err() {
                debug!(key = %key, "output stopped before completing, skipping finalization");
            }
            future::ready(handed_over.ok().map(Ok))
        })
        .boxed()
}

/// The update decision.
///
/// Keeps the last accepted value, seeded from the output the first time an update
/// arrives. If the output has not emitted yet, the first update waits for it. A pending value is accepted when `should_update` says so, and
/// replaced by `next_value` before it is emitted. Rejected values never reach the
/// store. Ends after the final update.
fn decide<S, D>(
    updates: EventStream<(Update<S>, D)>,
    output: ReplayChannel<Constrained<S>>,
    should_update: ShouldUpdate<S, D>,
    next_value: NextValue<S, D>,
) -> EventStream<Option<S>>
where
    S: StateValue,
    D: Send + 'static,
{
    stream::unfold(Some((updates, None)), move |state| {
        let output = output.clone();
        let should_update = Arc::clone(&should_update);
        let next_value = Arc::clone(&next_value);
        async move {
            let (mut updates, mut prev): (_, Option<Option<S>>) = state?;
            loop {
                let (update, deps) = match updates.next().await? {
                    Ok(item) => item,
                    Err(e) => return Some((Err(e), None)),
                };
                if prev.is_none() {
                    match shown(&output).await {
                        Ok(seed) => prev = Some(seed),
                        Err(e) => return Some((Err(e), None)),
                    }
                }
                let prev_state = prev.get_or_insert(None);
                let (pending, is_final) = match update {
                    Update::Next(pending) => (Some(pending), false),
                    Update::Final(fixed) => (fixed, true),
                };

                if let Some(pending) = pending {
                    if should_update(prev_state.as_ref(), &pending, &deps) {
                        let next = next_value(prev_state.as_ref(), pending, &deps);
                        *prev_state = Some(next.clone());
                        let state = (!is_final).then_some((updates, prev));
                        return Some((Ok(Some(next)), state));
                    }
                }
                if is_final {
                    return None;
                }
            }
        }
    })
    .boxed()
}

/// The state the output shows, waiting for its first emission.
async fn shown<S: StateValue>(output: &ReplayChannel<Constrained<S>>) -> Result<Option<S>> {
    match output.subscribe().next().await {
        Some(Ok(constrained)) => Ok(constrained.state),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// Write every classified value to the store, then complete the subject.
async fn persist<S: StateValue>(
    shared: Arc<Shared<S>>,
    state: Arc<dyn BackingState>,
    mut writes: EventStream<Option<Value>>,
) {
    while let Some(item) = writes.next().await {
        let value = match item {
            Ok(value) => value,
            Err(e) => {
                shared.fail(e);
                return;
            }
        };
        if let Err(e) = state.update(Box::new(move |_: Option<Value>| value)).await {
            shared.fail(e);
            return;
        }
    }
    shared.finish();
}
