//! Failures of the inference pipeline and of the result cache.
//!
//! Only [`PipelineError`] is ever shown to a client. [`CacheError`]s are
//! absorbed by [`crate::InferenceService`], which degrades to the miss path.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The uploaded bytes could not be decoded as an RGB image.
    #[error("Invalid image file: {0}")]
    InvalidImage(String),
    /// The model call failed, timed out, or produced an unexpected shape.
    #[error("Model inference failed: {0}")]
    ModelInference(String),
}

impl PipelineError {
    /// Whether the client is the one to blame for the failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InvalidImage(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out")]
    Timeout,
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}
