use std::fmt;

/// Error produced when a model's validation hook rejects a `set`.
///
/// The rejected mutation is discarded atomically; the error travels on the
/// model's `invalid` event and is also returned synchronously by
/// [`Model::validate`](crate::Model::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.message)
    }
}

impl std::error::Error for ValidationError {}
