//! Constraints: business rules applied to state before it is shown or stored.
//!
//! A [`StateConstraints`] exposes its field limits together with two functions:
//! `adjust`, a best-effort correction applied to every live value, and `fix`, the
//! authoritative correction applied once when a subject finalizes. A
//! [`DynamicStateConstraints`] derives the effective constraints from the state it
//! is about to correct.
//!
//! Constraints are a best-effort dependency. When the constraints stream fails or
//! completes, [`recover`] keeps the last good value in place instead of failing
//! the subject.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::stream::{EventStream, combine_latest, with_latest_ready};

/// Limits that apply to a single field of the state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// The field cannot be changed by the user
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
}

impl FieldConstraint {
    /// Clamp a number into `[min, max]`.
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }

    /// Whether `len` lies within `[min_length, max_length]`.
    pub fn fits_length(&self, len: usize) -> bool {
        self.min_length.is_none_or(|min| len >= min) && self.max_length.is_none_or(|max| len <= max)
    }
}

/// Field limits keyed by field name.
pub type Constraints = BTreeMap<String, FieldConstraint>;

static NO_CONSTRAINTS: LazyLock<Constraints> = LazyLock::new(Constraints::new);

/// Rules a subject enforces on its state.
pub trait StateConstraints<S>: Send + Sync {
    /// The effective field limits.
    fn constraints(&self) -> &Constraints;

    /// Best-effort correction applied to every live value.
    fn adjust(&self, state: S) -> S;

    /// Authoritative correction applied once when the subject finalizes.
    fn fix(&self, state: S) -> S;
}

/// Constraints that depend on the state they apply to.
pub trait DynamicStateConstraints<S>: Send + Sync {
    /// Compute the constraints that govern `state`.
    fn calibrate(&self, state: &S) -> Arc<dyn StateConstraints<S>>;
}

/// Constraints that change nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconstrained;

impl<S> StateConstraints<S> for Unconstrained {
    fn constraints(&self) -> &Constraints {
        &NO_CONSTRAINTS
    }

    fn adjust(&self, state: S) -> S {
        state
    }

    fn fix(&self, state: S) -> S {
        state
    }
}

/// A value emitted on a subject's constraints stream.
pub enum ConstraintSource<S> {
    Static(Arc<dyn StateConstraints<S>>),
    Dynamic(Arc<dyn DynamicStateConstraints<S>>),
}

impl<S> Clone for ConstraintSource<S> {
    fn clone(&self) -> Self {
        match self {
            ConstraintSource::Static(c) => ConstraintSource::Static(Arc::clone(c)),
            ConstraintSource::Dynamic(c) => ConstraintSource::Dynamic(Arc::clone(c)),
        }
    }
}

impl<S> std::fmt::Debug for ConstraintSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintSource::Static(c) => f.debug_tuple("Static").field(c.constraints()).finish(),
            ConstraintSource::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

impl<S> Default for ConstraintSource<S> {
    fn default() -> Self {
        ConstraintSource::Static(Arc::new(Unconstrained))
    }
}

impl<S> ConstraintSource<S> {
    pub fn fixed(constraints: impl StateConstraints<S> + 'static) -> Self {
        ConstraintSource::Static(Arc::new(constraints))
    }

    pub fn dynamic(constraints: impl DynamicStateConstraints<S> + 'static) -> Self {
        ConstraintSource::Dynamic(Arc::new(constraints))
    }

    /// The constraints that govern `state`.
    pub fn calibrate(&self, state: &S) -> Arc<dyn StateConstraints<S>> {
        match self {
            ConstraintSource::Static(c) => Arc::clone(c),
            ConstraintSource::Dynamic(c) => c.calibrate(state),
        }
    }
}

/// A state together with the limits that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Constrained<S> {
    pub constraints: Constraints,
    pub state: Option<S>,
}

impl<S> Constrained<S> {
    fn empty() -> Self {
        Self {
            constraints: Constraints::new(),
            state: None,
        }
    }
}

/// Apply [`StateConstraints::adjust`] to `state`, or to `initial` when `state` is `None`.
pub fn adjust_state<S: Clone>(
    source: &ConstraintSource<S>,
    state: Option<S>,
    initial: Option<&S>,
) -> Constrained<S> {
    apply(source, state, initial, |c, s| c.adjust(s))
}

/// Apply [`StateConstraints::fix`] to `state`, or to `initial` when `state` is `None`.
pub fn fix_state<S: Clone>(
    source: &ConstraintSource<S>,
    state: Option<S>,
    initial: Option<&S>,
) -> Constrained<S> {
    apply(source, state, initial, |c, s| c.fix(s))
}

fn apply<S: Clone>(
    source: &ConstraintSource<S>,
    state: Option<S>,
    initial: Option<&S>,
    op: impl FnOnce(&dyn StateConstraints<S>, S) -> S,
) -> Constrained<S> {
    let Some(state) = state.or_else(|| initial.cloned()) else {
        return Constrained::empty();
    };
    let calibrated = source.calibrate(&state);
    let state = op(calibrated.as_ref(), state);
    Constrained {
        constraints: calibrated.constraints().clone(),
        state: Some(state),
    }
}

/// Adjust every value of `input` against the latest constraints.
///
/// Emits again whenever either side changes, so subscribers always see the state
/// under the limits currently in force.
pub fn adjust<S>(
    input: EventStream<Option<S>>,
    constraints: EventStream<ConstraintSource<S>>,
    initial: Option<S>,
) -> EventStream<Constrained<S>>
where
    S: Clone + Send + Sync + 'static,
{
    combine_latest(input, constraints)
        .map_ok(move |(state, source)| adjust_state(&source, state, initial.as_ref()))
        .boxed()
}

/// Fix every value of `input` against the latest constraints, once per value.
///
/// Values are withheld until the constraints stream has emitted.
pub fn fix<S>(
    input: EventStream<Option<S>>,
    constraints: EventStream<ConstraintSource<S>>,
    initial: Option<S>,
) -> EventStream<Constrained<S>>
where
    S: Clone + Send + Sync + 'static,
{
    with_latest_ready(input, constraints)
        .map_ok(move |(state, source)| fix_state(&source, state, initial.as_ref()))
        .boxed()
}

/// Shield a subject from a failing constraints stream.
///
/// Errors and completion end the returned stream quietly, leaving the last good
/// value as the latest one. If nothing was emitted before that, [`Unconstrained`]
/// is emitted first.
pub fn recover<S>(
    key: &str,
    constraints: EventStream<ConstraintSource<S>>,
) -> EventStream<ConstraintSource<S>>
where
    S: Send + Sync + 'static,
{
    let key = key.to_string();
    stream::unfold(Some((constraints, false)), move |state| {
        let key = key.clone();
        async move {
            let (mut constraints, emitted) = state?;
            let fallback: Option<(crate::Result<ConstraintSource<S>>, _)> =
                (!emitted).then(|| (Ok(ConstraintSource::default()), None));
            match constraints.next().await {
                Some(Ok(source)) => Some((Ok(source), Some((constraints, true)))),
                Some(Err(e)) => {
                    warn!(key = %key, error = %e, "constraints failed, keeping the last good value");
                    fallback
                }
                None => {
                    debug!(key = %key, "constraints completed");
                    fallback
                }
            }
        }
    })
    .boxed()
}
