//! Fake models and image fixtures for tests.

use std::{
    future::Future,
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::{
    error::CacheError,
    model::{Logits, Model},
    preprocess::ImageTensor,
    store::ResultCache,
};

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    encode(image, ImageFormat::Png)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .expect("encoding an in-memory image");
    bytes.into_inner()
}

/// A PNG filled with a single color.
pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(width, height, Rgb(color)).into())
}

/// Always returns the same scores, in a `(1, N)` shape unless told otherwise.
pub struct FixedLogitsModel {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl FixedLogitsModel {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            shape: vec![1, values.len()],
            values,
        }
    }

    pub fn with_shape(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }
}

impl Model for FixedLogitsModel {
    fn infer(&self, _input: &ImageTensor) -> anyhow::Result<Logits> {
        Ok(Logits {
            shape: self.shape.clone(),
            values: self.values.clone(),
        })
    }
}

/// Scores class `i` with the mean of channel `i % 3`, scaled by `i / 3 + 1`,
/// so differently colored images land in different classes.
pub struct ChannelMeanModel {
    num_classes: usize,
}

impl ChannelMeanModel {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl Model for ChannelMeanModel {
    fn infer(&self, input: &ImageTensor) -> anyhow::Result<Logits> {
        let [_, channels, height, width] = input.shape();
        let plane = height * width;
        let means: Vec<f32> = (0..channels)
            .map(|c| input.data()[c * plane..(c + 1) * plane].iter().sum::<f32>() / plane as f32)
            .collect();
        let values = (0..self.num_classes)
            .map(|i| means[i % channels] * (i / channels + 1) as f32)
            .collect();
        Ok(Logits {
            shape: vec![1, self.num_classes],
            values,
        })
    }
}

pub struct FailingModel;

impl Model for FailingModel {
    fn infer(&self, _input: &ImageTensor) -> anyhow::Result<Logits> {
        bail!("the model exploded")
    }
}

/// Sleeps before answering, to exercise timeouts.
pub struct SlowModel<M> {
    pub inner: M,
    pub delay: Duration,
}

impl<M: Model> Model for SlowModel<M> {
    fn infer(&self, input: &ImageTensor) -> anyhow::Result<Logits> {
        std::thread::sleep(self.delay);
        self.inner.infer(input)
    }
}

/// Counts how many times the wrapped model runs.
pub struct CountingModel<M> {
    inner: M,
    calls: Arc<AtomicUsize>,
}

impl<M: Model> CountingModel<M> {
    /// Returns the model and a handle on its call counter.
    pub fn new(inner: M) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl<M: Model> Model for CountingModel<M> {
    fn infer(&self, input: &ImageTensor) -> anyhow::Result<Logits> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.infer(input)
    }
}

/// A cache whose backend is down.
#[derive(Clone, Default)]
pub struct UnavailableCache;

impl ResultCache for UnavailableCache {
    fn get(&self, _key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send {
        async { Err(CacheError::Unavailable("connection refused".into())) }
    }

    fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async { Err(CacheError::Unavailable("connection refused".into())) }
    }

    fn delete(&self, _key: &str) -> impl Future<Output = Result<(), CacheError>> + Send {
        async { Err(CacheError::Unavailable("connection refused".into())) }
    }
}

/// A cache that never answers.
#[derive(Clone, Default)]
pub struct StalledCache;

impl ResultCache for StalledCache {
    fn get(&self, _key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send {
        std::future::pending()
    }

    fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        std::future::pending()
    }

    fn delete(&self, _key: &str) -> impl Future<Output = Result<(), CacheError>> + Send {
        std::future::pending()
    }
}
