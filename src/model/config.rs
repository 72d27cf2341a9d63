//! ModelConfig - explicit per-model configuration.
//!
//! The identity attribute, default attributes, and validation hook are
//! passed in at construction rather than read from ambient globals, so two
//! model types with different identity keys can coexist in one process.

use std::fmt;
use std::sync::Arc;

use crate::value::AttrMap;

/// Validation hook: inspects a candidate attribute map and returns an
/// error message when the mutation must be rejected.
pub type Validator = Arc<dyn Fn(&AttrMap) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct ModelConfig {
    /// Attribute carrying the model's persistent identity.
    pub id_attribute: String,
    /// Attributes filled in at construction when absent from the input.
    pub defaults: AttrMap,
    /// Optional validation hook, engaged by `SetOptions::validate`.
    pub validator: Option<Validator>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            id_attribute: "id".to_string(),
            defaults: AttrMap::new(),
            validator: None,
        }
    }
}

impl ModelConfig {
    pub fn with_id_attribute(id_attribute: impl Into<String>) -> Self {
        ModelConfig {
            id_attribute: id_attribute.into(),
            ..ModelConfig::default()
        }
    }

    pub fn defaults(mut self, defaults: AttrMap) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&AttrMap) -> Option<String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

// The validator closure has no useful Debug form; render presence only.
impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id_attribute", &self.id_attribute)
            .field("defaults", &self.defaults)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
