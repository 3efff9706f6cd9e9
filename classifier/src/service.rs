//! Request pipeline: content key, cache lookup, and on a miss, preprocessing,
//! classification and cache fill.
//!
//! The cache is strictly an accelerator. Lookups and writes are bounded by
//! [`ServiceConfig::cache_timeout`]; any cache failure is logged and the
//! request carries on as a miss, so results are the same with the cache down
//! or disabled.

use std::{future::Future, time::Duration};

use tracing::{debug, error, instrument, warn};

use crate::{
    classify::Classifier,
    error::{CacheError, PipelineError},
    prediction::{PredictionResult, Source},
    preprocess::Preprocessor,
    store::{CacheEntry, DEFAULT_TTL, ResultCache, cache_key},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Lifetime of a cached prediction.
    pub cache_ttl: Duration,
    /// Upper bound of any single cache operation.
    pub cache_timeout: Duration,
    /// Upper bound of decoding, preprocessing and model execution together.
    pub inference_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            cache_timeout: Duration::from_millis(500),
            inference_timeout: Duration::from_secs(30),
        }
    }
}

pub struct InferenceService<C> {
    preprocessor: Preprocessor,
    classifier: Classifier,
    cache: C,
    config: ServiceConfig,
}

impl<C: ResultCache + Sync> InferenceService<C> {
    pub fn new(preprocessor: Preprocessor, classifier: Classifier, cache: C) -> Self {
        Self {
            preprocessor,
            classifier,
            cache,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Classifies the raw bytes of an uploaded image.
    ///
    /// Only [`PipelineError::InvalidImage`] and
    /// [`PipelineError::ModelInference`] can come out of here; failed
    /// requests are never cached.
    #[instrument(skip_all, fields(size = image.len()))]
    pub async fn predict(&self, image: Vec<u8>) -> Result<PredictionResult, PipelineError> {
        let key = cache_key(&image);
        if let Some(hit) = self.lookup(&key).await {
            debug!(key = %key, "cache hit");
            return Ok(hit);
        }
        debug!(key = %key, "cache miss");

        let result = match self.infer(image).await {
            Ok(result) => result,
            Err(err @ PipelineError::InvalidImage(_)) => {
                debug!("rejecting upload: {err}");
                return Err(err);
            }
            Err(err) => {
                error!("{err}");
                return Err(err);
            }
        };

        let entry = CacheEntry::from(&result).encode();
        if let Err(err) = self
            .bounded(self.cache.set(&key, entry, self.config.cache_ttl))
            .await
        {
            warn!(key = %key, "dropping cache write: {err}");
        }
        Ok(result)
    }

    /// A usable cached result, if any. Corrupt entries are deleted.
    async fn lookup(&self, key: &str) -> Option<PredictionResult> {
        let value = match self.bounded(self.cache.get(key)).await {
            Ok(value) => value?,
            Err(err) => {
                warn!(key = %key, "cache lookup failed, falling back to inference: {err}");
                return None;
            }
        };
        match CacheEntry::decode(&value) {
            Ok(entry) => Some(entry.into_prediction(Source::Cache)),
            Err(err) => {
                warn!(key = %key, "{err}, deleting it");
                if let Err(err) = self.bounded(self.cache.delete(key)).await {
                    warn!(key = %key, "failed to delete corrupt entry: {err}");
                }
                None
            }
        }
    }

    async fn infer(&self, image: Vec<u8>) -> Result<PredictionResult, PipelineError> {
        let preprocessor = self.preprocessor;
        let classifier = self.classifier.clone();
        // decoding and the model are CPU bound, keep them off the async workers
        let task = tokio::task::spawn_blocking(move || {
            let tensor = preprocessor.preprocess(&image)?;
            classifier.classify(&tensor)
        });

        let classification = match tokio::time::timeout(self.config.inference_timeout, task).await
        {
            Ok(Ok(classification)) => classification?,
            Ok(Err(e)) => {
                return Err(PipelineError::ModelInference(format!(
                    "inference task failed: {e}"
                )));
            }
            Err(_) => {
                return Err(PipelineError::ModelInference(format!(
                    "no answer after {:?}",
                    self.config.inference_timeout
                )));
            }
        };
        Ok(PredictionResult::from_classification(classification))
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.config.cache_timeout, operation)
            .await
            .unwrap_or(Err(CacheError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        model::Model,
        store::{CacheKind, MemCache},
        testing::{
            ChannelMeanModel, CountingModel, FailingModel, SlowModel, StalledCache,
            UnavailableCache, solid_png,
        },
    };

    const SIZE: u32 = 16;

    fn service<C: ResultCache + Sync>(
        model: impl Model + 'static,
        cache: C,
    ) -> InferenceService<C> {
        InferenceService::new(
            Preprocessor::new(SIZE),
            Classifier::new(Arc::new(model)),
            cache,
        )
    }

    fn counted(num_classes: usize) -> (CountingModel<ChannelMeanModel>, Arc<AtomicUsize>) {
        CountingModel::new(ChannelMeanModel::new(num_classes))
    }

    fn red() -> Vec<u8> {
        solid_png(32, 32, [255, 0, 0])
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let (model, calls) = counted(6);
        let service = service(model, MemCache::default());

        let first = service.predict(red()).await.unwrap();
        assert_eq!(first.source, Source::Inference);
        assert_eq!(first.predicted_class, 3);

        let second = service.predict(red()).await.unwrap();
        assert_eq!(second.source, Source::Cache);
        assert_eq!(second.predicted_class, first.predicted_class);
        assert_eq!(second.confidence, first.confidence);
        assert_eq!(second.class_probabilities, first.class_probabilities);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_bytes_are_different_entries() {
        let (model, calls) = counted(6);
        let service = service(model, MemCache::default());

        let red = service.predict(red()).await.unwrap();
        let blue = service
            .predict(solid_png(32, 32, [0, 0, 255]))
            .await
            .unwrap();
        assert_eq!(blue.source, Source::Inference);
        assert_ne!(red.predicted_class, blue.predicted_class);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.cache().len(), 2);
    }

    #[tokio::test]
    async fn corrupt_entry_is_replaced() {
        let (model, calls) = counted(6);
        let cache = MemCache::default();
        let key = cache_key(&red());
        cache
            .set(&key, "not|a valid|entry".into(), DEFAULT_TTL)
            .await
            .unwrap();
        let service = service(model, cache.clone());

        let result = service.predict(red()).await.unwrap();
        assert_eq!(result.source, Source::Inference);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(CacheEntry::decode(&stored).unwrap(), CacheEntry::from(&result));
        assert_eq!(service.predict(red()).await.unwrap().source, Source::Cache);
    }

    #[tokio::test]
    async fn invalid_image_is_not_cached() {
        let (model, calls) = counted(6);
        let service = service(model, MemCache::default());

        let err = service.predict(b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
        assert!(service.cache().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_failure_is_not_cached() {
        let service = service(FailingModel, MemCache::default());

        let err = service.predict(red()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelInference(_)));
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn unavailable_cache_degrades_to_inference() {
        let (model, calls) = counted(6);
        let service = service(model, UnavailableCache);

        for _ in 0..2 {
            let result = service.predict(red()).await.unwrap();
            assert_eq!(result.source, Source::Inference);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stalled_cache_is_bounded() {
        let (model, _) = counted(6);
        let service = service(model, StalledCache).with_config(ServiceConfig {
            cache_timeout: Duration::from_millis(20),
            ..Default::default()
        });

        let result = tokio::time::timeout(Duration::from_secs(5), service.predict(red()))
            .await
            .expect("cache timeouts must not stall the request")
            .unwrap();
        assert_eq!(result.source, Source::Inference);
    }

    #[tokio::test]
    async fn disabled_cache_gives_same_answers() {
        let cached = service(ChannelMeanModel::new(6), MemCache::default());
        let uncached = service(ChannelMeanModel::new(6), CacheKind::Disabled);

        for _ in 0..2 {
            let expected = cached.predict(red()).await.unwrap();
            let got = uncached.predict(red()).await.unwrap();
            assert_eq!(got.source, Source::Inference);
            assert_eq!(got.predicted_class, expected.predicted_class);
            assert_eq!(got.confidence, expected.confidence);
            assert_eq!(got.class_probabilities, expected.class_probabilities);
        }
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let model = SlowModel {
            inner: ChannelMeanModel::new(6),
            delay: Duration::from_millis(500),
        };
        let service = service(model, MemCache::default()).with_config(ServiceConfig {
            inference_timeout: Duration::from_millis(20),
            ..Default::default()
        });

        let err = service.predict(red()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelInference(_)));
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (model, calls) = counted(6);
        let service = service(model, MemCache::default()).with_config(ServiceConfig {
            cache_ttl: Duration::from_millis(30),
            ..Default::default()
        });

        service.predict(red()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let result = service.predict(red()).await.unwrap();
        assert_eq!(result.source, Source::Inference);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_requests_agree() {
        let service = Arc::new(service(ChannelMeanModel::new(6), MemCache::default()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.predict(red()).await })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        for result in &results {
            assert_eq!(result.predicted_class, results[0].predicted_class);
            assert_eq!(result.confidence, results[0].confidence);
            assert_eq!(result.class_probabilities, results[0].class_probabilities);
        }
        assert_eq!(service.cache().len(), 1);
    }
}
