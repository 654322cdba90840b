//! Classification: splitting state into an encrypted secret and a disclosed remainder.
//!
//! A [`Classifier`] decides which parts of a serialized state are secret. The
//! [`StateCodec`] turns state into its persisted representation and back, using the
//! format fixed by the subject's key:
//!
//! ```text
//! Write: state → serde_json::Value → classify() → encrypt(secret) → ClassifiedFormat
//! Read:  ClassifiedFormat → decrypt(secret) → declassify(disclosed, secret) → state
//! ```
//!
//! With the plain format the serialized state is stored as-is.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Error, Result,
    crypto::{EncryptedPayload, UserEncryptor},
    state::{ClassificationFormat, StateKey, StateValue},
    stream::{EventStream, combine_latest, ready, signal, with_latest_ready},
};

mod errors;

pub use errors::ClassifyError;

/// The two halves of a classified state.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// Encrypted before it leaves the process
    pub secret: Value,
    /// Stored in the clear next to the secret
    pub disclosed: Value,
}

/// Splits a serialized state into secret and disclosed parts, and joins them back.
pub trait Classifier: Send + Sync {
    fn classify(&self, state: Value) -> Result<Classification>;

    fn declassify(&self, disclosed: Value, secret: Value) -> Result<Value>;
}

/// Classifies the top-level fields of an object.
///
/// Every field is secret unless it was disclosed with [`disclose`](Self::disclose).
/// States that are not JSON objects are wholly secret.
#[derive(Clone, Debug, Default)]
pub struct FieldClassifier {
    disclosed: BTreeSet<String>,
}

impl FieldClassifier {
    /// A classifier that keeps the entire state secret.
    pub fn all_secret() -> Self {
        Self::default()
    }

    /// Store `field` in the clear.
    pub fn disclose(mut self, field: impl Into<String>) -> Self {
        self.disclosed.insert(field.into());
        self
    }
}

impl Classifier for FieldClassifier {
    fn classify(&self, state: Value) -> Result<Classification> {
        let Value::Object(fields) = state else {
            return Ok(Classification {
                secret: state,
                disclosed: Value::Object(Map::new()),
            });
        };

        let (disclosed, secret): (Map<String, Value>, Map<String, Value>) = fields
            .into_iter()
            .partition(|(field, _)| self.disclosed.contains(field));

        Ok(Classification {
            secret: Value::Object(secret),
            disclosed: Value::Object(disclosed),
        })
    }

    fn declassify(&self, disclosed: Value, secret: Value) -> Result<Value> {
        let disclosed = match disclosed {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(ClassifyError::DeclassifyFailed {
                    reason: format!("disclosed data must be an object, found {other}"),
                }
                .into());
            }
        };

        match secret {
            Value::Object(mut fields) => {
                fields.extend(disclosed);
                Ok(Value::Object(fields))
            }
            secret if disclosed.is_empty() => Ok(secret),
            _ => Err(ClassifyError::DeclassifyFailed {
                reason: "disclosed fields cannot be merged into a non-object secret".to_string(),
            }
            .into()),
        }
    }
}

/// The envelope written to the backing store by the classified format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedFormat {
    /// Reserved for a key identifier; always `None`
    pub id: Option<String>,
    pub secret: EncryptedPayload,
    pub disclosed: Value,
}

impl ClassifiedFormat {
    const FIELDS: [&'static str; 3] = ["id", "secret", "disclosed"];

    /// Validate and parse a stored value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = &value else {
            return Err(ClassifyError::MalformedEnvelope {
                reason: "expected an object".to_string(),
            }
            .into());
        };
        if let Some(missing) = Self::FIELDS.iter().find(|f| !fields.contains_key(**f)) {
            return Err(ClassifyError::MalformedEnvelope {
                reason: format!("missing field '{missing}'"),
            }
            .into());
        }

        serde_json::from_value(value).map_err(|e| {
            ClassifyError::MalformedEnvelope {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Converts between state and its persisted representation.
///
/// Selected once from the key when a subject is built and never changes afterwards.
#[derive(Clone)]
pub enum StateCodec {
    /// Serialized state is stored as-is
    Plain,
    /// State is split by the classifier and its secret is encrypted
    Classified { classifier: Arc<dyn Classifier> },
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateCodec::Plain => write!(f, "Plain"),
            StateCodec::Classified { .. } => write!(f, "Classified"),
        }
    }
}

impl StateCodec {
    pub fn from_key<S>(key: &StateKey<S>) -> Self {
        match key {
            StateKey::Object(object) if object.format == ClassificationFormat::Classified => {
                StateCodec::Classified {
                    classifier: Arc::clone(&object.classifier),
                }
            }
            _ => StateCodec::Plain,
        }
    }

    pub fn format(&self) -> ClassificationFormat {
        match self {
            StateCodec::Plain => ClassificationFormat::Plain,
            StateCodec::Classified { .. } => ClassificationFormat::Classified,
        }
    }

    /// Turn state into its persisted representation.
    ///
    /// The plain format is a pass-through, but it still waits for the first
    /// encryptor so that nothing is written before the user identity is confirmed.
    /// The classified format pairs each state with the latest encryptor, splits it
    /// and encrypts the secret. `None` passes through untouched.
    pub fn classify<S: StateValue>(
        &self,
        input: EventStream<Option<S>>,
        encryptor: EventStream<Arc<dyn UserEncryptor>>,
    ) -> EventStream<Option<Value>> {
        match self {
            StateCodec::Plain => ready(input, vec![signal(encryptor)])
                .and_then(|state| {
                    let value = state.map(serde_json::to_value).transpose();
                    future::ready(value.map_err(Error::from))
                })
                .boxed(),
            StateCodec::Classified { classifier } => {
                let classifier = Arc::clone(classifier);
                with_latest_ready(input, encryptor)
                    .and_then(move |(state, encryptor)| {
                        let classifier = Arc::clone(&classifier);
                        async move {
                            match state {
                                Some(state) => {
                                    seal(classifier.as_ref(), &state, encryptor.as_ref())
                                        .await
                                        .map(Some)
                                }
                                None => Ok(None),
                            }
                        }
                    })
                    .boxed()
            }
        }
    }

    /// Turn persisted values back into state.
    ///
    /// The classified format reacts to every encryptor change, not just the first,
    /// re-opening the latest stored value with the new encryptor. `None` passes
    /// through untouched.
    pub fn declassify<S: StateValue>(
        &self,
        input: EventStream<Option<Value>>,
        encryptor: EventStream<Arc<dyn UserEncryptor>>,
    ) -> EventStream<Option<S>> {
        match self {
            StateCodec::Plain => input
                .and_then(|value| {
                    let state = value.map(serde_json::from_value::<S>).transpose();
                    future::ready(state.map_err(Error::from))
                })
                .boxed(),
            StateCodec::Classified { classifier } => {
                let classifier = Arc::clone(classifier);
                combine_latest(input, encryptor)
                    .and_then(move |(value, encryptor)| {
                        let classifier = Arc::clone(&classifier);
                        async move {
                            match value {
                                Some(value) => {
                                    unseal(classifier.as_ref(), value, encryptor.as_ref())
                                        .await
                                        .map(Some)
                                }
                                None => Ok(None),
                            }
                        }
                    })
                    .boxed()
            }
        }
    }
}

async fn seal<S: StateValue>(
    classifier: &dyn Classifier,
    state: &S,
    encryptor: &dyn UserEncryptor,
) -> Result<Value> {
    let Classification { secret, disclosed } = classifier.classify(serde_json::to_value(state)?)?;
    let secret = encryptor.encrypt(secret).await?;
    let envelope = ClassifiedFormat {
        id: None,
        secret,
        disclosed,
    };
    Ok(serde_json::to_value(envelope)?)
}

async fn unseal<S: StateValue>(
    classifier: &dyn Classifier,
    value: Value,
    encryptor: &dyn UserEncryptor,
) -> Result<S> {
    let envelope = ClassifiedFormat::from_value(value)?;
    let secret = encryptor.decrypt(&envelope.secret).await?;
    let state = classifier.declassify(envelope.disclosed, secret)?;
    Ok(serde_json::from_value(state)?)
}
