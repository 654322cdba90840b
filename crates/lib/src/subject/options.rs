//! Construction options for [`UserStateSubject`](super::UserStateSubject).

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};

use super::SubjectError;
use crate::{
    Result,
    constraints::ConstraintSource,
    crypto::{EncryptorProvider, UserBound, UserEncryptor},
    state::{StateValue, UserId},
    stream::EventStream,
};

/// Decides whether a pending value should be written: `(previous, pending, dependencies)`.
pub type ShouldUpdate<S, D> = Arc<dyn Fn(Option<&S>, &S, &D) -> bool + Send + Sync>;

/// Computes the value to write: `(previous, pending, dependencies)`.
pub type NextValue<S, D> = Arc<dyn Fn(Option<&S>, S, &D) -> S + Send + Sync>;

/// Where a subject gets its encryptor from.
pub enum EncryptorSource {
    /// Encryptors already tagged with the user they belong to
    Bound(EventStream<UserBound<Arc<dyn UserEncryptor>>>),
    /// Bare user ids, resolved to encryptors by a provider
    ForUser {
        user_ids: EventStream<UserId>,
        provider: Arc<dyn EncryptorProvider>,
    },
}

impl EncryptorSource {
    /// Resolve the source into encryptors that provably belong to `user_id`.
    ///
    /// Fails with [`SubjectError::UserIdMismatch`] as soon as any reported user id,
    /// or the user id of a resolved encryptor, differs from `user_id`.
    pub(crate) fn verified(self, user_id: UserId) -> EventStream<Arc<dyn UserEncryptor>> {
        match self {
            EncryptorSource::Bound(bound) => bound
                .and_then(move |bound| {
                    let checked = check_user(&user_id, &bound.user_id)
                        .and_then(|()| check_user(&user_id, bound.value.user_id()))
                        .map(|()| bound.value);
                    futures::future::ready(checked)
                })
                .boxed(),
            EncryptorSource::ForUser { user_ids, provider } => user_ids
                .and_then(move |actual| resolve(Arc::clone(&provider), user_id.clone(), actual))
                .boxed(),
        }
    }
}

async fn resolve(
    provider: Arc<dyn EncryptorProvider>,
    expected: UserId,
    actual: UserId,
) -> Result<Arc<dyn UserEncryptor>> {
    check_user(&expected, &actual)?;
    let encryptor = provider.encryptor_for(&actual).await?;
    check_user(&expected, encryptor.user_id())?;
    Ok(encryptor)
}

fn check_user(expected: &UserId, actual: &UserId) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(SubjectError::UserIdMismatch {
            expected_user_id: expected.clone(),
            actual_user_id: actual.clone(),
        }
        .into())
    }
}

/// The streams and policies a subject is built from.
///
/// Only the encryptor source is required. Everything else has a default:
///
/// | Option | Default |
/// |---|---|
/// | [`when`](Self::when) | always `true` |
/// | [`constraints`](Self::constraints) | [`Unconstrained`](crate::constraints::Unconstrained) |
/// | [`dependencies`](Self::dependencies) | `D::default()` |
/// | [`should_update`](Self::should_update) | always `true` |
/// | [`next_value`](Self::next_value) | the pending value |
pub struct SubjectDependencies<S, D = ()> {
    pub(crate) encryptor: EncryptorSource,
    pub(crate) when: EventStream<bool>,
    pub(crate) constraints: EventStream<ConstraintSource<S>>,
    pub(crate) dependencies: EventStream<D>,
    pub(crate) should_update: ShouldUpdate<S, D>,
    pub(crate) next_value: NextValue<S, D>,
}

impl<S, D> SubjectDependencies<S, D>
where
    S: StateValue,
    D: Clone + Default + Send + Sync + 'static,
{
    /// Take encryptors from a stream of user-bound encryptors.
    pub fn bound(encryptor: EventStream<UserBound<Arc<dyn UserEncryptor>>>) -> Self {
        Self::with_source(EncryptorSource::Bound(encryptor))
    }

    /// Resolve encryptors through `provider` for each user id on `user_ids`.
    pub fn for_user(user_ids: EventStream<UserId>, provider: Arc<dyn EncryptorProvider>) -> Self {
        Self::with_source(EncryptorSource::ForUser { user_ids, provider })
    }

    fn with_source(encryptor: EncryptorSource) -> Self {
        Self {
            encryptor,
            when: constant(true),
            constraints: constant(ConstraintSource::default()),
            dependencies: constant(D::default()),
            should_update: Arc::new(|_, _, _| true),
            next_value: Arc::new(|_, pending, _| pending),
        }
    }

    /// Only write while the latest value of `when` is `true`.
    ///
    /// Completing `when` tears the subject down.
    pub fn when(mut self, when: EventStream<bool>) -> Self {
        self.when = when;
        self
    }

    /// Enforce the constraints emitted on `constraints`.
    ///
    /// Errors and completion of this stream are not fatal: the subject keeps the
    /// last constraints it received.
    pub fn constraints(mut self, constraints: EventStream<ConstraintSource<S>>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Thread the latest value of `dependencies` into the update decision.
    pub fn dependencies(mut self, dependencies: EventStream<D>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn should_update(
        mut self,
        should_update: impl Fn(Option<&S>, &S, &D) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_update = Arc::new(should_update);
        self
    }

    pub fn next_value(mut self, next_value: impl Fn(Option<&S>, S, &D) -> S + Send + Sync + 'static) -> Self {
        self.next_value = Arc::new(next_value);
        self
    }
}

/// A stream that emits `value` once and never completes.
fn constant<T: Send + 'static>(value: T) -> EventStream<T> {
    stream::once(futures::future::ready(Ok(value)))
        .chain(stream::pending())
        .boxed()
}
