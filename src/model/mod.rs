//! Model - a single mutable attribute record with change notification.
//!
//! A `Model` is a cheap-clone handle over shared state, so the same record
//! can be referenced by several collections at once. Instance identity is
//! pointer identity, never attribute equality. Every model carries a
//! process-unique client id (`cid`) assigned at construction; the
//! persistent identity lives in the configured id attribute and may change
//! over the model's life.
//!
//! Mutations go through [`Model::set`], which merges attributes, tracks
//! what changed, and fires one `change:<key>` event per changed attribute
//! followed by a single `change` event. Events fire only after the state
//! is fully updated, so listeners always observe consistent attributes.

mod config;

pub use config::{ModelConfig, Validator};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::trace;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::collection::{Collection, CollectionShared};
use crate::emitter::{Emitter, Subscription};
use crate::error::ValidationError;
use crate::value::{self, AttrMap};

static NEXT_CID: AtomicU64 = AtomicU64::new(1);

/// Payloads delivered to model listeners.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// A `set` completed with at least one changed attribute.
    Change { model: Model },
    /// One attribute changed; fired as `change:<key>` before `change`.
    ChangeAttr {
        model: Model,
        key: String,
        value: Value,
    },
    /// Validation rejected a `set`; no attribute was touched.
    Invalid {
        model: Model,
        error: ValidationError,
    },
}

/// Options for [`Model::set`] and [`Model::unset`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Suppress `change` / `change:<key>` events for this call.
    pub silent: bool,
    /// Run the configured validation hook before mutating.
    pub validate: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        SetOptions {
            silent: true,
            ..SetOptions::default()
        }
    }

    pub fn validated() -> Self {
        SetOptions {
            validate: true,
            ..SetOptions::default()
        }
    }
}

struct ModelState {
    attributes: AttrMap,
    /// Keys changed by the most recent `set`, with their new values
    /// (`Null` marks an unset key).
    changed: AttrMap,
    /// Full attribute snapshot taken before the most recent change.
    previous: AttrMap,
    /// Back-reference to the first collection that adopted this model.
    collection: Option<Weak<CollectionShared>>,
}

pub(crate) struct ModelShared {
    cid: String,
    config: ModelConfig,
    state: RwLock<ModelState>,
    emitter: Emitter<ModelEvent>,
}

#[derive(Clone)]
pub struct Model {
    pub(crate) shared: Arc<ModelShared>,
}

impl Model {
    /// Create a model from a JSON object with the default configuration.
    pub fn new(attributes: Value) -> Self {
        Model::with_config(attributes, ModelConfig::default())
    }

    /// Create a model from a JSON object with an explicit configuration.
    pub fn with_config(attributes: Value, config: ModelConfig) -> Self {
        Model::from_map(value::attrs(attributes), config)
    }

    /// Create a model from an attribute map. Configured defaults fill in
    /// any keys absent from the input.
    pub fn from_map(attributes: AttrMap, config: ModelConfig) -> Self {
        let mut merged = config.defaults.clone();
        for (key, value) in attributes {
            merged.insert(key, value);
        }

        let cid = format!("c{}", NEXT_CID.fetch_add(1, Ordering::Relaxed));
        Model {
            shared: Arc::new(ModelShared {
                cid,
                config,
                state: RwLock::new(ModelState {
                    attributes: merged,
                    changed: AttrMap::new(),
                    previous: AttrMap::new(),
                    collection: None,
                }),
                emitter: Emitter::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ModelState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ModelState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The client id: process-unique, stable for the model's lifetime.
    pub fn cid(&self) -> &str {
        &self.shared.cid
    }

    /// Name of the attribute carrying the persistent identity.
    pub fn id_attribute(&self) -> &str {
        &self.shared.config.id_attribute
    }

    /// Current persistent id, when present and non-null.
    pub fn id(&self) -> Option<Value> {
        self.get(self.id_attribute())
            .filter(|value| !value.is_null())
    }

    /// A model with no persistent id is "new" and addressable only by cid.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Resolved identity: canonical id key when a persistent id exists,
    /// otherwise the cid.
    pub(crate) fn index_key(&self) -> String {
        self.id()
            .as_ref()
            .and_then(value::id_key)
            .unwrap_or_else(|| self.shared.cid.clone())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().attributes.get(key).cloned()
    }

    /// Snapshot of the current attribute map.
    pub fn attributes(&self) -> AttrMap {
        self.read().attributes.clone()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// Merge a JSON object of attributes into the model. See [`set_map`].
    ///
    /// [`set_map`]: Model::set_map
    pub fn set(&self, attributes: Value, options: &SetOptions) -> bool {
        self.set_map(value::attrs(attributes), options)
    }

    /// Merge attributes into the model.
    ///
    /// For each key whose value differs from the current one, the previous
    /// value is recorded and a `change:<key>` event fires; one `change`
    /// event summarizes the call afterwards. Returns `false` when the
    /// validation hook rejects the mutation, in which case no attribute is
    /// touched and `invalid` fires instead.
    pub fn set_map(&self, attributes: AttrMap, options: &SetOptions) -> bool {
        if options.validate {
            if let Err(error) = self.validate(&attributes) {
                self.shared.emitter.emit(
                    "invalid",
                    &ModelEvent::Invalid {
                        model: self.clone(),
                        error,
                    },
                );
                return false;
            }
        }

        let changed_pairs: Vec<(String, Value)> = {
            let mut state = self.write();
            let snapshot = state.attributes.clone();
            let mut changed = Vec::new();
            for (key, value) in attributes {
                if state.attributes.get(&key) != Some(&value) {
                    state.attributes.insert(key.clone(), value.clone());
                    changed.push((key, value));
                }
            }
            state.changed = changed.iter().cloned().collect();
            if !changed.is_empty() {
                state.previous = snapshot;
            }
            changed
        };

        if !changed_pairs.is_empty() {
            trace!(
                "model {} changed {:?}",
                self.shared.cid,
                changed_pairs.iter().map(|(k, _)| k).collect::<Vec<_>>()
            );
            if !options.silent {
                for (key, value) in &changed_pairs {
                    let event = ModelEvent::ChangeAttr {
                        model: self.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    };
                    self.shared.emitter.emit(&format!("change:{}", key), &event);
                }
                self.shared
                    .emitter
                    .emit("change", &ModelEvent::Change { model: self.clone() });
            }
        }

        true
    }

    /// Remove an attribute, with the same change tracking and events as
    /// [`set_map`](Model::set_map). The changed value is recorded as null.
    /// Returns false when the key was absent.
    pub fn unset(&self, key: &str, options: &SetOptions) -> bool {
        let removed = {
            let mut state = self.write();
            if state.attributes.contains_key(key) {
                let snapshot = state.attributes.clone();
                state.attributes.remove(key);
                state.changed = std::iter::once((key.to_string(), Value::Null)).collect();
                state.previous = snapshot;
                true
            } else {
                state.changed = AttrMap::new();
                false
            }
        };

        if removed && !options.silent {
            let event = ModelEvent::ChangeAttr {
                model: self.clone(),
                key: key.to_string(),
                value: Value::Null,
            };
            self.shared.emitter.emit(&format!("change:{}", key), &event);
            self.shared
                .emitter
                .emit("change", &ModelEvent::Change { model: self.clone() });
        }

        removed
    }

    /// Did the given key (or any key, when `None`) change in the most
    /// recent `set`?
    pub fn has_changed(&self, key: Option<&str>) -> bool {
        let state = self.read();
        match key {
            Some(key) => state.changed.contains_key(key),
            None => !state.changed.is_empty(),
        }
    }

    /// Keys changed by the most recent `set`, with their new values.
    pub fn changed_attributes(&self) -> AttrMap {
        self.read().changed.clone()
    }

    /// Value of `key` before the most recent change.
    pub fn previous(&self, key: &str) -> Option<Value> {
        self.read().previous.get(key).cloned()
    }

    /// Full attribute snapshot from before the most recent change.
    pub fn previous_attributes(&self) -> AttrMap {
        self.read().previous.clone()
    }

    /// Run the validation hook against the current attributes merged with
    /// `attributes`. `Ok` when no hook is configured.
    pub fn validate(&self, attributes: &AttrMap) -> Result<(), ValidationError> {
        let Some(validator) = self.shared.config.validator.clone() else {
            return Ok(());
        };
        let mut candidate = self.attributes();
        for (key, value) in attributes {
            candidate.insert(key.clone(), value.clone());
        }
        match validator(&candidate) {
            Some(message) => Err(ValidationError::new(message)),
            None => Ok(()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate(&AttrMap::new()).is_ok()
    }

    /// Register a listener for `change`, `change:<key>`, or `invalid`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on(event, listener)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.shared.emitter.off(subscription)
    }

    /// The first collection that adopted this model, while it remains a
    /// member there.
    pub fn collection(&self) -> Option<Collection> {
        self.read()
            .collection
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Collection::from_shared)
    }

    pub(crate) fn attach_collection(&self, shared: &Arc<CollectionShared>) {
        let mut state = self.write();
        if state.collection.is_none() {
            state.collection = Some(Arc::downgrade(shared));
        }
    }

    pub(crate) fn detach_collection(&self, shared: &Arc<CollectionShared>) {
        let mut state = self.write();
        let owned_by_caller = state
            .collection
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(shared)));
        if owned_by_caller {
            state.collection = None;
        }
    }
}

/// Models compare by instance, never by attribute equality.
impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Model")
            .field("cid", &self.shared.cid)
            .field("attributes", &state.attributes)
            .finish()
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
