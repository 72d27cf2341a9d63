//! ModelFactory - tagged-variant model construction.
//!
//! Collections that hold more than one model shape pick the concrete
//! constructor from a discriminator attribute, resolved once at insertion
//! time through an explicit registry. Resolution always yields a model:
//! unknown or missing tags fall through to the fallback constructor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::model::{Model, ModelConfig};
use crate::value::AttrMap;

type Constructor = Arc<dyn Fn(AttrMap) -> Model + Send + Sync>;

#[derive(Clone)]
pub struct ModelFactory {
    discriminator: String,
    constructors: HashMap<String, Constructor>,
    fallback: Constructor,
}

impl ModelFactory {
    /// Factory keyed on `discriminator`, with a plain default-configured
    /// model as the fallback constructor.
    pub fn new(discriminator: impl Into<String>) -> Self {
        ModelFactory::with_fallback(discriminator, |attributes| {
            Model::from_map(attributes, ModelConfig::default())
        })
    }

    pub fn with_fallback<F>(discriminator: impl Into<String>, fallback: F) -> Self
    where
        F: Fn(AttrMap) -> Model + Send + Sync + 'static,
    {
        ModelFactory {
            discriminator: discriminator.into(),
            constructors: HashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Register the constructor for one discriminator tag.
    pub fn register<F>(mut self, tag: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(AttrMap) -> Model + Send + Sync + 'static,
    {
        self.constructors.insert(tag.into(), Arc::new(constructor));
        self
    }

    /// Build a model for the given attributes.
    pub fn resolve(&self, attributes: AttrMap) -> Model {
        let constructor = attributes
            .get(&self.discriminator)
            .and_then(Value::as_str)
            .and_then(|tag| self.constructors.get(tag))
            .unwrap_or(&self.fallback);
        constructor(attributes)
    }
}

impl fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ModelFactory")
            .field("discriminator", &self.discriminator)
            .field("tags", &tags)
            .finish()
    }
}
