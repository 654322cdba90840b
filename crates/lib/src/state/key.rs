//! Key descriptors: where a subject's state lives and how it is stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{Classifier, FieldClassifier};

/// How state is written to the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationFormat {
    /// The serialized state is stored as-is
    Plain,
    /// The state is split into an encrypted secret and a disclosed part
    Classified,
}

/// Lifecycle events on which the backing store should clear the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearOn {
    Lock,
    Logout,
}

/// Storage options carried by an [`ObjectKey`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    #[serde(default)]
    pub clear_on: Vec<ClearOn>,
}

/// A key that carries a classifier, a storage format, and an optional initial value.
pub struct ObjectKey<S> {
    pub key: String,
    pub classifier: Arc<dyn Classifier>,
    pub format: ClassificationFormat,
    pub options: KeyOptions,
    /// Used by the output path when nothing is stored yet
    pub initial: Option<S>,
}

impl<S> ObjectKey<S> {
    /// A classified key whose whole state is secret.
    pub fn classified(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            classifier: Arc::new(FieldClassifier::all_secret()),
            format: ClassificationFormat::Classified,
            options: KeyOptions::default(),
            initial: None,
        }
    }

    /// A plain key, stored without encryption.
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            format: ClassificationFormat::Plain,
            ..Self::classified(key)
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_initial(mut self, initial: S) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_options(mut self, options: KeyOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether the store should clear this key when `event` happens.
    pub fn clears_on(&self, event: ClearOn) -> bool {
        self.options.clear_on.contains(&event)
    }
}

/// Identifies the storage location and format of a subject's state.
pub enum StateKey<S> {
    /// Raw pass-through of the serialized state
    Plain { key: String },
    /// A key with classification metadata
    Object(ObjectKey<S>),
}

impl<S> StateKey<S> {
    pub fn plain(key: impl Into<String>) -> Self {
        StateKey::Plain { key: key.into() }
    }

    /// The storage key name.
    pub fn name(&self) -> &str {
        match self {
            StateKey::Plain { key } => key,
            StateKey::Object(object) => &object.key,
        }
    }

    /// The value used when nothing is stored.
    pub fn initial(&self) -> Option<&S> {
        match self {
            StateKey::Plain { .. } => None,
            StateKey::Object(object) => object.initial.as_ref(),
        }
    }

    /// The storage format. Plain keys are always [`ClassificationFormat::Plain`].
    pub fn format(&self) -> ClassificationFormat {
        match self {
            StateKey::Plain { .. } => ClassificationFormat::Plain,
            StateKey::Object(object) => object.format,
        }
    }
}

impl<S> From<ObjectKey<S>> for StateKey<S> {
    fn from(key: ObjectKey<S>) -> Self {
        StateKey::Object(key)
    }
}
