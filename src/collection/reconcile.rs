//! Reconciliation - diff-based `set` of a collection's membership.
//!
//! One pass converts the current membership into a target list with
//! minimal add/remove/merge operations. Structural changes are fully
//! applied - sequence, both indices, subscriptions, back-references -
//! before any event fires, in the order `remove`*, `add`*, `sort`,
//! `update`.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::{clamp_at, Collection, CollectionEvent, Comparator, Lookup, ModelInput};
use crate::model::{Model, SetOptions};
use crate::value;

/// Options for [`Collection::set`].
#[derive(Debug, Clone)]
pub struct SetModelsOptions {
    /// Insert target items that match no current member.
    pub add: bool,
    /// Drop current members absent from the target list.
    pub remove: bool,
    /// Merge attributes of matched items into the existing member.
    pub merge: bool,
    /// Explicit insert position for new items; disables the comparator
    /// for this call.
    pub at: Option<isize>,
    /// Allow the automatic sort pass when a comparator is active.
    pub sort: bool,
    pub silent: bool,
}

impl Default for SetModelsOptions {
    fn default() -> Self {
        SetModelsOptions {
            add: true,
            remove: true,
            merge: true,
            at: None,
            sort: true,
            silent: false,
        }
    }
}

/// The net membership change of one `add`/`remove`/`set` call, carried on
/// the `update` event. The three sets are disjoint.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub added: Vec<Model>,
    pub removed: Vec<Model>,
    /// Matched members whose attributes actually changed.
    pub merged: Vec<Model>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.merged.is_empty()
    }
}

/// When the aggregate `update` event fires: `add` only reports bulk
/// insertions, `set` reports any net change.
#[derive(Debug, Clone, Copy)]
pub(crate) enum UpdatePolicy {
    AnyChange,
    MultipleAdds,
}

impl Collection {
    /// Reconcile the membership with a target list.
    ///
    /// Matched items merge (when `merge` is on), unmatched target items
    /// insert (when `add` is on), members absent from the target drop
    /// (when `remove` is on). `None` is a no-op - it does not clear the
    /// collection; use [`reset`](Collection::reset) for that. Returns the
    /// resolved target models in target order.
    pub fn set(
        &self,
        inputs: Option<Vec<ModelInput>>,
        options: &SetModelsOptions,
    ) -> Vec<Model> {
        match inputs {
            Some(inputs) => self.reconcile(inputs, options, UpdatePolicy::AnyChange),
            None => Vec::new(),
        }
    }

    pub(crate) fn reconcile(
        &self,
        inputs: Vec<ModelInput>,
        options: &SetModelsOptions,
        policy: UpdatePolicy,
    ) -> Vec<Model> {
        let comparator = self.comparator();
        let sortable = options.at.is_none() && options.sort && comparator.is_some();
        let sort_attribute = match &comparator {
            Some(Comparator::Attribute(name)) => Some(name.clone()),
            _ => None,
        };

        let mut order: Vec<Model> = Vec::new();
        let mut to_add: Vec<Model> = Vec::new();
        let mut merged: Vec<Model> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut resolved: HashMap<String, Model> = HashMap::new();
        let mut sort_needed = false;

        // the member change hook must not re-sort mid-call; the sort pass
        // below owns the single sort event, fired after removes and adds
        let hold = self.hold_member_sorts();

        // Resolve each target item to a member or a new model. Merges run
        // here, before the structural phase, so their change events see a
        // consistent collection and the member hook can re-key ids.
        // Duplicate identities within the target list collapse onto the
        // first occurrence; later attributes still merge into it.
        for input in inputs {
            let key_hint = match &input {
                ModelInput::Model(model) => Some(model.index_key()),
                ModelInput::Attrs(map) => {
                    map.get(self.id_attribute()).and_then(value::id_key)
                }
            };
            let existing = match &input {
                ModelInput::Model(model) => self.get(model),
                ModelInput::Attrs(map) => self.get(Lookup::Attrs(map.clone())),
            }
            .or_else(|| {
                key_hint
                    .as_ref()
                    .and_then(|key| resolved.get(key).cloned())
            });
            match existing {
                Some(member) => {
                    let freshly_added = to_add.contains(&member);
                    if options.merge {
                        let attributes = match &input {
                            // the member itself: nothing to merge
                            ModelInput::Model(model) if *model == member => None,
                            ModelInput::Model(model) => Some(model.attributes()),
                            ModelInput::Attrs(map) => Some(map.clone()),
                        };
                        if let Some(attributes) = attributes {
                            let merge_options = SetOptions {
                                silent: options.silent,
                                validate: false,
                            };
                            member.set_map(attributes, &merge_options);
                            if member.has_changed(None) {
                                if sortable
                                    && sort_attribute
                                        .as_deref()
                                        .is_some_and(|name| member.has_changed(Some(name)))
                                {
                                    sort_needed = true;
                                }
                                // a model the call itself inserts reports
                                // as added, never as merged
                                if !freshly_added && !merged.contains(&member) {
                                    merged.push(member.clone());
                                }
                            }
                        }
                    }
                    let key = member.index_key();
                    if seen.insert(key.clone()) {
                        resolved.insert(key, member.clone());
                        order.push(member);
                    }
                }
                None => {
                    if !options.add {
                        continue;
                    }
                    let model = self.prepare_model(input);
                    let key = model.index_key();
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    resolved.insert(key, model.clone());
                    if sortable {
                        sort_needed = true;
                    }
                    to_add.push(model.clone());
                    order.push(model);
                }
            }
        }

        // Removals run first so recorded indices reflect each successive
        // removal.
        let mut removed: Vec<(Model, usize)> = Vec::new();
        if options.remove {
            let stale: Vec<Model> = self
                .models()
                .into_iter()
                .filter(|member| !seen.contains(&member.index_key()))
                .collect();
            removed = self.detach_members(stale);
        }

        // Splice in the new membership. Without a comparator, a full
        // add+remove set installs the target order wholesale; otherwise
        // new models splice at `at` (or the end) and the comparator has
        // the final word.
        let replace = !sortable && options.add && options.remove && options.at.is_none();
        let mut order_changed = false;
        let mut insert_at: Option<usize> = None;
        {
            let mut state = self.write();
            if replace && !order.is_empty() {
                order_changed = state.models.len() != order.len()
                    || state
                        .models
                        .iter()
                        .zip(order.iter())
                        .any(|(current, target)| current != target);
                state.models = order.clone();
                for model in &to_add {
                    self.install_member(&mut state, model);
                }
            } else if !to_add.is_empty() {
                let at = match options.at {
                    Some(at) => {
                        let clamped = clamp_at(at, state.models.len());
                        insert_at = Some(clamped);
                        clamped
                    }
                    None => state.models.len(),
                };
                for (offset, model) in to_add.iter().enumerate() {
                    state.models.insert(at + offset, model.clone());
                    self.install_member(&mut state, model);
                }
            }
        }

        let sorted_changed = if sort_needed {
            self.sort_sequence()
        } else {
            false
        };
        drop(hold);

        if !options.silent {
            for (model, index) in &removed {
                self.emit(
                    "remove",
                    CollectionEvent::Remove {
                        model: model.clone(),
                        collection: self.clone(),
                        index: *index,
                    },
                );
            }
            for (offset, model) in to_add.iter().enumerate() {
                let index = match insert_at {
                    Some(at) => Some(at + offset),
                    None if sortable => self.index_of(model),
                    None => None,
                };
                self.emit(
                    "add",
                    CollectionEvent::Add {
                        model: model.clone(),
                        collection: self.clone(),
                        index,
                    },
                );
            }

            // A pure attribute merge that moved nothing must not announce
            // a sort.
            let emit_sort =
                order_changed || (sort_needed && (sorted_changed || !to_add.is_empty()));
            if emit_sort {
                self.emit(
                    "sort",
                    CollectionEvent::Sort {
                        collection: self.clone(),
                    },
                );
            }

            let changes = Changes {
                added: to_add.clone(),
                removed: removed.iter().map(|(model, _)| model.clone()).collect(),
                merged,
            };
            let fire_update = match policy {
                UpdatePolicy::AnyChange => !changes.is_empty(),
                UpdatePolicy::MultipleAdds => changes.added.len() >= 2,
            };
            if fire_update {
                debug!(
                    "membership update: {} added, {} removed, {} merged",
                    changes.added.len(),
                    changes.removed.len(),
                    changes.merged.len()
                );
                self.emit(
                    "update",
                    CollectionEvent::Update {
                        collection: self.clone(),
                        changes,
                    },
                );
            }
        }

        order
    }
}
