//! sinew - observable models and ordered collections.
//!
//! An in-memory, synchronous data layer: [`Model`] is a single mutable
//! attribute record with change events; [`Collection`] is an ordered,
//! deduplicated, id-indexed container of models with granular `add`,
//! `remove`, `change`, `sort`, `update`, and `reset` notifications and a
//! diff-based [`set`](Collection::set) reconciliation.
//!
//! Events fire only after every invariant is restored, so listeners can
//! query - or further mutate - the collection from inside any handler.

mod collection;
mod emitter;
mod error;
mod factory;
mod model;
mod value;

pub use collection::{
    AddOptions, Changes, Collection, CollectionConfig, CollectionEvent, Comparator, Lookup,
    ModelInput, RemoveOptions, ResetOptions, SetModelsOptions, SortOptions,
};
pub use emitter::{Emitter, Subscription};
pub use error::ValidationError;
pub use factory::ModelFactory;
pub use model::{Model, ModelConfig, ModelEvent, SetOptions, Validator};
pub use value::{attrs, value_cmp, AttrMap};
