//! Content-addressed look-aside cache for prediction results.
//!
//! Keys are derived from the raw upload bytes only ([`cache_key`]); values are
//! [`CacheEntry`]s in their pipe-delimited text form. Backends store opaque
//! strings and know nothing of the encoding.

use std::{future::Future, time::Duration};

use itertools::Itertools;
use sha2::{Digest, Sha256};

use crate::{
    error::CacheError,
    prediction::{PredictionResult, Source},
};

mod memory;
mod redis;

pub use self::{memory::MemCache, redis::RedisCache};

/// Namespace of every key written by this crate.
pub const KEY_PREFIX: &str = "inference";

/// How long a cached prediction stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// `"inference:" + hex(sha256(bytes))`.
pub fn cache_key(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("{KEY_PREFIX}:{}", hex::encode(hash))
}

/// A key/value store with expiry, holding encoded [`CacheEntry`]s.
pub trait ResultCache {
    /// Fetch the value stored under `key`, if present and not expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Store `value` under `key`, replacing anything already there.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// The cache backend chosen at startup.
#[derive(Clone, derive_more::From)]
pub enum CacheKind {
    Redis(RedisCache),
    Mem(MemCache),
    /// Caching turned off: every lookup misses, every write is dropped.
    #[from(ignore)]
    Disabled,
}

impl ResultCache for CacheKind {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send {
        async move {
            match self {
                CacheKind::Redis(cache) => cache.get(key).await,
                CacheKind::Mem(cache) => cache.get(key).await,
                CacheKind::Disabled => Ok(None),
            }
        }
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            match self {
                CacheKind::Redis(cache) => cache.set(key, value, ttl).await,
                CacheKind::Mem(cache) => cache.set(key, value, ttl).await,
                CacheKind::Disabled => Ok(()),
            }
        }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            match self {
                CacheKind::Redis(cache) => cache.delete(key).await,
                CacheKind::Mem(cache) => cache.delete(key).await,
                CacheKind::Disabled => Ok(()),
            }
        }
    }
}

/// The cached part of a [`PredictionResult`]; provenance is not stored.
///
/// Encoded as `"{class}|{confidence:.4}|{p0},{p1},..."`. Probabilities use the
/// shortest representation that parses back to the same `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub predicted_class: usize,
    pub confidence: f32,
    pub class_probabilities: Vec<f32>,
}

impl CacheEntry {
    pub fn encode(&self) -> String {
        format!(
            "{}|{:.4}|{}",
            self.predicted_class,
            self.confidence,
            self.class_probabilities.iter().join(",")
        )
    }

    pub fn decode(value: &str) -> Result<Self, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt(reason);

        let fields: Vec<&str> = value.split('|').collect();
        let [class, confidence, probabilities] = fields.as_slice() else {
            return Err(corrupt(format!("expected 3 fields, found {}", fields.len())));
        };
        let predicted_class = class
            .parse::<usize>()
            .map_err(|e| corrupt(format!("class `{class}`: {e}")))?;
        let confidence = parse_finite(confidence).map_err(corrupt)?;
        let class_probabilities = probabilities
            .split(',')
            .map(parse_finite)
            .collect::<Result<Vec<_>, _>>()
            .map_err(corrupt)?;
        if predicted_class >= class_probabilities.len() {
            return Err(corrupt(format!(
                "class {predicted_class} out of range for {} probabilities",
                class_probabilities.len()
            )));
        }

        Ok(Self {
            predicted_class,
            confidence,
            class_probabilities,
        })
    }

    pub fn into_prediction(self, source: Source) -> PredictionResult {
        PredictionResult {
            source,
            predicted_class: self.predicted_class,
            confidence: self.confidence,
            class_probabilities: self.class_probabilities,
        }
    }
}

impl From<&PredictionResult> for CacheEntry {
    fn from(result: &PredictionResult) -> Self {
        Self {
            predicted_class: result.predicted_class,
            confidence: result.confidence,
            class_probabilities: result.class_probabilities.clone(),
        }
    }
}

fn parse_finite(field: &str) -> Result<f32, String> {
    match field.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(value) => Err(format!("non-finite value {value}")),
        Err(e) => Err(format!("`{field}`: {e}")),
    }
}
