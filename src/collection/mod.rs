//! Collection - ordered, deduplicated, id-indexed container of models.
//!
//! A collection keeps three views of its membership consistent at all
//! times: the ordered sequence, an index by persistent id, and an index by
//! client id. Members are shared by reference; adding a model to a second
//! collection does not copy it. The collection listens to each member's
//! `change` event so an identity change re-keys the id index in place and
//! a change to an attribute comparator's attribute re-sorts.
//!
//! All mutations complete their index and sequence updates before any
//! event fires. Events are a commit-point signal: a listener may query or
//! mutate the collection and will always observe consistent state.

mod reconcile;

pub use reconcile::{Changes, SetModelsOptions};
pub(crate) use reconcile::UpdatePolicy;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, trace};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::emitter::{Emitter, Subscription};
use crate::factory::ModelFactory;
use crate::model::{Model, ModelConfig, ModelEvent};
use crate::value::{self, AttrMap};

/// Payloads delivered to collection listeners.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// A model was inserted. `index` is present when an explicit `at` or a
    /// comparator determined the position.
    Add {
        model: Model,
        collection: Collection,
        index: Option<usize>,
    },
    /// A model was removed; `index` is its pre-removal position.
    Remove {
        model: Model,
        collection: Collection,
        index: usize,
    },
    /// Net membership change after an `add`, `remove`, or `set`.
    Update {
        collection: Collection,
        changes: Changes,
    },
    /// The sequence order changed.
    Sort { collection: Collection },
    /// The entire membership was replaced.
    Reset {
        collection: Collection,
        previous_models: Vec<Model>,
    },
}

/// Sort order for a collection's sequence.
#[derive(Clone)]
pub enum Comparator {
    /// Ascending by one attribute, ordered by [`value_cmp`](crate::value_cmp).
    Attribute(String),
    /// Ascending by an extracted key, ordered by [`value_cmp`](crate::value_cmp).
    Key(Arc<dyn Fn(&Model) -> Value + Send + Sync>),
    /// Full two-argument comparator.
    Cmp(Arc<dyn Fn(&Model, &Model) -> Ordering + Send + Sync>),
}

impl Comparator {
    pub fn attribute(name: impl Into<String>) -> Self {
        Comparator::Attribute(name.into())
    }

    pub fn key<F>(extract: F) -> Self
    where
        F: Fn(&Model) -> Value + Send + Sync + 'static,
    {
        Comparator::Key(Arc::new(extract))
    }

    pub fn cmp<F>(compare: F) -> Self
    where
        F: Fn(&Model, &Model) -> Ordering + Send + Sync + 'static,
    {
        Comparator::Cmp(Arc::new(compare))
    }

    pub(crate) fn compare(&self, a: &Model, b: &Model) -> Ordering {
        match self {
            Comparator::Attribute(name) => value::value_cmp(
                &a.get(name).unwrap_or(Value::Null),
                &b.get(name).unwrap_or(Value::Null),
            ),
            Comparator::Key(extract) => value::value_cmp(&extract(a), &extract(b)),
            Comparator::Cmp(compare) => compare(a, b),
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Attribute(name) => write!(f, "Comparator::Attribute({:?})", name),
            Comparator::Key(_) => write!(f, "Comparator::Key(..)"),
            Comparator::Cmp(_) => write!(f, "Comparator::Cmp(..)"),
        }
    }
}

/// Explicit per-collection configuration; nothing is read from globals.
#[derive(Debug, Clone, Default)]
pub struct CollectionConfig {
    /// Configuration applied to models the collection constructs from raw
    /// attribute maps.
    pub model: ModelConfig,
    /// Polymorphic constructor consulted instead of `model` when present.
    pub factory: Option<ModelFactory>,
    /// Initial sort order.
    pub comparator: Option<Comparator>,
}

impl CollectionConfig {
    pub fn with_comparator(comparator: Comparator) -> Self {
        CollectionConfig {
            comparator: Some(comparator),
            ..CollectionConfig::default()
        }
    }
}

/// One item handed to `add`/`set`/`reset`: an existing model or raw
/// attributes for the collection to construct one from.
#[derive(Debug, Clone)]
pub enum ModelInput {
    Model(Model),
    Attrs(AttrMap),
}

impl From<Model> for ModelInput {
    fn from(model: Model) -> Self {
        ModelInput::Model(model)
    }
}

impl From<&Model> for ModelInput {
    fn from(model: &Model) -> Self {
        ModelInput::Model(model.clone())
    }
}

impl From<AttrMap> for ModelInput {
    fn from(map: AttrMap) -> Self {
        ModelInput::Attrs(map)
    }
}

/// Accepts JSON objects; panics on scalars, which is a programmer error.
impl From<Value> for ModelInput {
    fn from(value: Value) -> Self {
        ModelInput::Attrs(value::attrs(value))
    }
}

/// Query argument for [`Collection::get`] and [`Collection::remove`]:
/// a persistent id, a client id, a model, or an attribute probe.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Resolved against the id index first, then the cid index.
    Key(String),
    /// Resolved through the id attribute in the map.
    Attrs(AttrMap),
    /// Resolved through the model's own identity.
    Model(Model),
    /// Unresolvable input, e.g. a null id.
    None,
}

impl From<&str> for Lookup {
    fn from(key: &str) -> Self {
        Lookup::Key(key.to_string())
    }
}

impl From<String> for Lookup {
    fn from(key: String) -> Self {
        Lookup::Key(key)
    }
}

impl From<i64> for Lookup {
    fn from(id: i64) -> Self {
        Lookup::Key(id.to_string())
    }
}

impl From<&Model> for Lookup {
    fn from(model: &Model) -> Self {
        Lookup::Model(model.clone())
    }
}

impl From<&Value> for Lookup {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => Lookup::Attrs(map.clone()),
            other => match value::id_key(other) {
                Some(key) => Lookup::Key(key),
                None => Lookup::None,
            },
        }
    }
}

/// Options for [`Collection::add`] and [`Collection::add_many`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Insert position; negative counts from the end (`-1` appends).
    /// Out-of-range values clamp. Takes precedence over the comparator.
    pub at: Option<isize>,
    /// Merge attributes into an existing member with the same identity
    /// instead of skipping the duplicate.
    pub merge: bool,
    pub silent: bool,
}

impl AddOptions {
    pub fn at(index: isize) -> Self {
        AddOptions {
            at: Some(index),
            ..AddOptions::default()
        }
    }

    pub fn merging() -> Self {
        AddOptions {
            merge: true,
            ..AddOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub silent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    pub silent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SortOptions {
    pub silent: bool,
}

struct CollectionState {
    models: Vec<Model>,
    by_id: HashMap<String, Model>,
    by_cid: HashMap<String, Model>,
    comparator: Option<Comparator>,
    /// Per-member `change` subscription, keyed by cid.
    subscriptions: HashMap<String, Subscription>,
}

pub(crate) struct CollectionShared {
    config: CollectionConfig,
    state: RwLock<CollectionState>,
    emitter: Emitter<CollectionEvent>,
    /// Non-zero while a `set` call is applying merges; the member change
    /// hook then leaves reordering to that call's own sort pass.
    sort_holds: AtomicUsize,
}

/// Suspends member-driven re-sorts until dropped.
pub(crate) struct SortHold {
    shared: Arc<CollectionShared>,
}

impl Drop for SortHold {
    fn drop(&mut self) {
        self.shared.sort_holds.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

#[derive(Clone)]
pub struct Collection {
    pub(crate) shared: Arc<CollectionShared>,
}

impl Collection {
    pub fn new(config: CollectionConfig) -> Self {
        let comparator = config.comparator.clone();
        Collection {
            shared: Arc::new(CollectionShared {
                config,
                state: RwLock::new(CollectionState {
                    models: Vec::new(),
                    by_id: HashMap::new(),
                    by_cid: HashMap::new(),
                    comparator,
                    subscriptions: HashMap::new(),
                }),
                emitter: Emitter::new(),
                sort_holds: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a collection pre-populated with `inputs`, without firing any
    /// events for the initial membership.
    pub fn with_models(inputs: Vec<ModelInput>, config: CollectionConfig) -> Self {
        let collection = Collection::new(config);
        let options = SetModelsOptions {
            silent: true,
            ..SetModelsOptions::default()
        };
        collection.reconcile(inputs, &options, UpdatePolicy::AnyChange);
        collection
    }

    pub(crate) fn from_shared(shared: Arc<CollectionShared>) -> Self {
        Collection { shared }
    }

    fn read(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: &str, payload: CollectionEvent) {
        self.shared.emitter.emit(event, &payload);
    }

    pub fn len(&self) -> usize {
        self.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().models.is_empty()
    }

    /// Snapshot of the ordered member sequence.
    pub fn models(&self) -> Vec<Model> {
        self.read().models.clone()
    }

    /// Member at `index`; negative indices count from the end.
    pub fn at(&self, index: isize) -> Option<Model> {
        let state = self.read();
        let len = state.models.len() as isize;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return None;
        }
        Some(state.models[resolved as usize].clone())
    }

    /// Position of the given instance in the sequence.
    pub fn index_of(&self, model: &Model) -> Option<usize> {
        self.read().models.iter().position(|member| member == model)
    }

    /// The value of `key` for every member, in sequence order.
    pub fn pluck(&self, key: &str) -> Vec<Value> {
        self.read()
            .models
            .iter()
            .map(|model| model.get(key).unwrap_or(Value::Null))
            .collect()
    }

    /// Resolve a member by persistent id, client id, model identity, or an
    /// attribute probe. Unresolvable input returns `None`.
    pub fn get(&self, query: impl Into<Lookup>) -> Option<Model> {
        let state = self.read();
        match query.into() {
            Lookup::Key(key) => state
                .by_id
                .get(&key)
                .or_else(|| state.by_cid.get(&key))
                .cloned(),
            Lookup::Model(model) => state
                .by_id
                .get(&model.index_key())
                .or_else(|| state.by_cid.get(model.cid()))
                .cloned(),
            Lookup::Attrs(map) => map
                .get(&self.shared.config.model.id_attribute)
                .and_then(value::id_key)
                .and_then(|key| state.by_id.get(&key).cloned()),
            Lookup::None => None,
        }
    }

    /// Insert one model or attributes object. A duplicate identity is a
    /// silent no-op returning the existing member, unless `merge` is set,
    /// in which case the attributes merge into it.
    pub fn add(&self, input: impl Into<ModelInput>, options: &AddOptions) -> Model {
        let mut resolved = self.add_many(vec![input.into()], options);
        resolved
            .pop()
            .expect("a single add input always resolves to one model")
    }

    /// Insert several models; fires one `add` per new member and a single
    /// `update` when two or more were inserted.
    pub fn add_many(&self, inputs: Vec<ModelInput>, options: &AddOptions) -> Vec<Model> {
        let set_options = SetModelsOptions {
            add: true,
            remove: false,
            merge: options.merge,
            at: options.at,
            sort: true,
            silent: options.silent,
        };
        self.reconcile(inputs, &set_options, UpdatePolicy::MultipleAdds)
    }

    /// Remove the member matching `query`. Returns `None` (and stays
    /// silent) when nothing matches.
    pub fn remove(&self, query: impl Into<Lookup>, options: &RemoveOptions) -> Option<Model> {
        let member = self.get(query)?;
        let removed = self.detach_members(vec![member]);
        self.finish_remove(&removed, options.silent);
        removed.into_iter().next().map(|(model, _)| model)
    }

    /// Remove every member matching one of `queries`; unmatched queries
    /// are omitted from the result.
    pub fn remove_many<L: Into<Lookup>>(
        &self,
        queries: Vec<L>,
        options: &RemoveOptions,
    ) -> Vec<Model> {
        let mut members = Vec::new();
        for query in queries {
            if let Some(member) = self.get(query) {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
        let removed = self.detach_members(members);
        self.finish_remove(&removed, options.silent);
        removed.into_iter().map(|(model, _)| model).collect()
    }

    fn finish_remove(&self, removed: &[(Model, usize)], silent: bool) {
        if silent || removed.is_empty() {
            return;
        }
        for (model, index) in removed {
            self.emit(
                "remove",
                CollectionEvent::Remove {
                    model: model.clone(),
                    collection: self.clone(),
                    index: *index,
                },
            );
        }
        let changes = Changes {
            removed: removed.iter().map(|(model, _)| model.clone()).collect(),
            ..Changes::default()
        };
        self.emit(
            "update",
            CollectionEvent::Update {
                collection: self.clone(),
                changes,
            },
        );
    }

    /// Detach members from the sequence, both indices, the member
    /// subscription, and the model back-reference. Emits nothing; the
    /// recorded indices reflect each successive removal.
    pub(crate) fn detach_members(&self, members: Vec<Model>) -> Vec<(Model, usize)> {
        let mut removed = Vec::new();
        let mut state = self.write();
        for model in members {
            let Some(index) = state.models.iter().position(|member| member == &model) else {
                continue;
            };
            state.models.remove(index);
            state.by_cid.remove(model.cid());
            if let Some(key) = model.id().as_ref().and_then(value::id_key) {
                if state.by_id.get(&key).is_some_and(|member| member == &model) {
                    state.by_id.remove(&key);
                }
            }
            if let Some(subscription) = state.subscriptions.remove(model.cid()) {
                model.off(&subscription);
            }
            model.detach_collection(&self.shared);
            debug!("removed model {} at index {}", model.cid(), index);
            removed.push((model, index));
        }
        removed
    }

    /// Index a new member and hook its `change` event. Caller holds the
    /// state lock and has already placed the model in the sequence.
    fn install_member(&self, state: &mut CollectionState, model: &Model) {
        state.by_cid.insert(model.cid().to_string(), model.clone());
        if let Some(key) = model.id().as_ref().and_then(value::id_key) {
            state.by_id.insert(key, model.clone());
        }
        let subscription = self.hook_member(model);
        state
            .subscriptions
            .insert(model.cid().to_string(), subscription);
        model.attach_collection(&self.shared);
    }

    pub(crate) fn hold_member_sorts(&self) -> SortHold {
        self.shared.sort_holds.fetch_add(1, AtomicOrdering::Relaxed);
        SortHold {
            shared: Arc::clone(&self.shared),
        }
    }

    fn hook_member(&self, model: &Model) -> Subscription {
        let weak = Arc::downgrade(&self.shared);
        model.on("change", move |event: &ModelEvent| {
            if let ModelEvent::Change { model } = event {
                if let Some(shared) = weak.upgrade() {
                    Collection::from_shared(shared).on_member_change(model);
                }
            }
        })
    }

    /// Keep the id index and sort order current when a member changes.
    fn on_member_change(&self, model: &Model) {
        let id_attribute = model.id_attribute().to_string();
        if model.has_changed(Some(&id_attribute)) {
            let mut state = self.write();
            if state.by_cid.contains_key(model.cid()) {
                if let Some(old) = model.previous(&id_attribute).as_ref().and_then(value::id_key)
                {
                    if state.by_id.get(&old).is_some_and(|member| member == model) {
                        state.by_id.remove(&old);
                    }
                }
                if let Some(new) = model.id().as_ref().and_then(value::id_key) {
                    state.by_id.insert(new, model.clone());
                }
                trace!("re-keyed model {} in id index", model.cid());
            }
        }

        // during a set call the reconciliation owns the reorder and the
        // single sort event
        if self.shared.sort_holds.load(AtomicOrdering::Relaxed) != 0 {
            return;
        }
        let depends_on_order = {
            let state = self.read();
            matches!(
                &state.comparator,
                Some(Comparator::Attribute(name)) if model.has_changed(Some(name))
            )
        };
        if depends_on_order && self.sort_sequence() {
            self.emit(
                "sort",
                CollectionEvent::Sort {
                    collection: self.clone(),
                },
            );
        }
    }

    /// Reorder the sequence per the comparator; emits `sort` unless
    /// silenced.
    ///
    /// # Panics
    ///
    /// Panics when no comparator is configured.
    pub fn sort(&self, options: &SortOptions) {
        self.sort_sequence();
        if !options.silent {
            self.emit(
                "sort",
                CollectionEvent::Sort {
                    collection: self.clone(),
                },
            );
        }
    }

    /// Stable sort of the sequence. Returns whether any position changed.
    pub(crate) fn sort_sequence(&self) -> bool {
        let comparator = match self.comparator() {
            Some(comparator) => comparator,
            None => panic!("cannot sort a collection without a comparator"),
        };
        let mut sorted = self.models();
        sorted.sort_by(|a, b| comparator.compare(a, b));

        let mut state = self.write();
        let changed = state.models.len() != sorted.len()
            || state
                .models
                .iter()
                .zip(sorted.iter())
                .any(|(current, next)| current != next);
        if changed {
            trace!("re-sorted {} models", sorted.len());
            state.models = sorted;
        }
        changed
    }

    pub fn comparator(&self) -> Option<Comparator> {
        self.read().comparator.clone()
    }

    /// Replace the comparator. Does not re-sort; call [`sort`](Collection::sort).
    pub fn set_comparator(&self, comparator: Option<Comparator>) {
        self.write().comparator = comparator;
    }

    /// Atomically replace the entire membership. No per-item events fire;
    /// one `reset` event carries the previous member list. `None` clears.
    pub fn reset(&self, inputs: Option<Vec<ModelInput>>, options: &ResetOptions) -> Vec<Model> {
        let previous: Vec<Model> = {
            let mut state = self.write();
            let previous = std::mem::take(&mut state.models);
            state.by_id.clear();
            state.by_cid.clear();
            let subscriptions = std::mem::take(&mut state.subscriptions);
            for model in &previous {
                if let Some(subscription) = subscriptions.get(model.cid()) {
                    model.off(subscription);
                }
                model.detach_collection(&self.shared);
            }
            previous
        };

        let installed = match inputs {
            Some(inputs) => {
                let install = SetModelsOptions {
                    silent: true,
                    ..SetModelsOptions::default()
                };
                self.reconcile(inputs, &install, UpdatePolicy::AnyChange)
            }
            None => Vec::new(),
        };

        debug!(
            "reset collection: {} members replaced by {}",
            previous.len(),
            installed.len()
        );
        if !options.silent {
            self.emit(
                "reset",
                CollectionEvent::Reset {
                    collection: self.clone(),
                    previous_models: previous,
                },
            );
        }
        installed
    }

    /// Build a member from raw attributes through the configured factory,
    /// or pass an existing model through.
    pub(crate) fn prepare_model(&self, input: ModelInput) -> Model {
        match input {
            ModelInput::Model(model) => model,
            ModelInput::Attrs(map) => match &self.shared.config.factory {
                Some(factory) => factory.resolve(map),
                None => Model::from_map(map, self.shared.config.model.clone()),
            },
        }
    }

    pub(crate) fn id_attribute(&self) -> &str {
        &self.shared.config.model.id_attribute
    }

    /// Register a listener for `add`, `remove`, `update`, `sort`, or
    /// `reset`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on(event, listener)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.shared.emitter.off(subscription)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.read().models.iter().map(Model::to_json).collect())
    }
}

/// Collections compare by instance.
impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Collection {}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let cids: Vec<&str> = state.models.iter().map(|model| model.cid()).collect();
        f.debug_struct("Collection")
            .field("len", &state.models.len())
            .field("models", &cids)
            .finish()
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let models = self.models();
        let mut seq = serializer.serialize_seq(Some(models.len()))?;
        for model in &models {
            seq.serialize_element(model)?;
        }
        seq.end()
    }
}

/// Clamp an insert position to `[0, len]`; negative values count from the
/// end, with `-1` meaning append.
pub(crate) fn clamp_at(at: isize, len: usize) -> usize {
    let mut at = at;
    if at < 0 {
        at += len as isize + 1;
    }
    at.clamp(0, len as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(ids: &[i64]) -> Collection {
        let inputs = ids.iter().map(|id| json!({ "id": id }).into()).collect();
        Collection::with_models(inputs, CollectionConfig::default())
    }

    #[test]
    fn with_models_builds_in_order() {
        let col = collection(&[3, 2, 1]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.pluck("id"), vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn at_supports_negative_indices() {
        let col = collection(&[3, 2, 1]);
        assert_eq!(col.at(0).unwrap().id(), Some(json!(3)));
        assert_eq!(col.at(-1).unwrap().id(), Some(json!(1)));
        assert_eq!(col.at(-3).unwrap().id(), Some(json!(3)));
        assert!(col.at(3).is_none());
        assert!(col.at(-4).is_none());
    }

    #[test]
    fn get_resolves_id_cid_model_and_attrs() {
        let col = collection(&[1]);
        let member = col.at(0).unwrap();

        assert_eq!(col.get(1), Some(member.clone()));
        assert_eq!(col.get("1"), Some(member.clone()));
        assert_eq!(col.get(member.cid()), Some(member.clone()));
        assert_eq!(col.get(&member), Some(member.clone()));
        assert_eq!(col.get(&json!({ "id": 1 })), Some(member));
        assert_eq!(col.get(&json!(null)), None);
        assert_eq!(col.get(2), None);
    }

    #[test]
    fn clamping_insert_positions() {
        assert_eq!(clamp_at(0, 3), 0);
        assert_eq!(clamp_at(2, 3), 2);
        assert_eq!(clamp_at(10, 3), 3);
        assert_eq!(clamp_at(-1, 3), 3);
        assert_eq!(clamp_at(-2, 3), 2);
        assert_eq!(clamp_at(-10, 3), 0);
    }

    #[test]
    #[should_panic(expected = "without a comparator")]
    fn sort_without_comparator_panics() {
        collection(&[1, 2]).sort(&SortOptions::default());
    }

    #[test]
    fn serializes_as_array_of_attribute_objects() {
        let col = collection(&[1, 2]);
        assert_eq!(
            serde_json::to_value(&col).unwrap(),
            json!([{ "id": 1 }, { "id": 2 }])
        );
        assert_eq!(col.to_json(), json!([{ "id": 1 }, { "id": 2 }]));
    }
}
