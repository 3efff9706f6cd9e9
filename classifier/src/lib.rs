//! Image classification pipeline: decode and normalize an uploaded image, run
//! it through an opaque classifier, and keep the result in a content-addressed
//! look-aside cache.

pub mod classify;
pub mod error;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod service;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{Classification, Classifier};
pub use error::{CacheError, PipelineError};
pub use model::{Logits, Model, OnnxModel};
pub use prediction::{PredictionResult, Source};
pub use preprocess::{IMAGE_SIZE, ImageTensor, Preprocessor};
pub use service::{InferenceService, ServiceConfig};
pub use store::{CacheEntry, CacheKind, MemCache, RedisCache, ResultCache, cache_key};
