//! The opaque classifier, seen as a single capability: tensor in, raw scores
//! out.

use std::{io::Cursor, path::Path};

use anyhow::{Context, ensure};
use tracing::info;
use tract_onnx::prelude::*;

use crate::preprocess::ImageTensor;

/// Raw, unnormalized model output.
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// A loaded classifier. Implementations are shared read-only between
/// concurrent requests, hence the `Send + Sync` bound.
pub trait Model: Send + Sync {
    fn infer(&self, input: &ImageTensor) -> anyhow::Result<Logits>;
}

type Plan = TypedRunnableModel<TypedModel>;

/// An ONNX classifier executed by `tract`.
pub struct OnnxModel {
    plan: Plan,
    input_name: String,
    input_shape: [usize; 4],
}

impl OnnxModel {
    /// Loads and optimizes the model found at `path`, pinning its single input
    /// to `f32 (1, 3, input_size, input_size)`.
    pub fn load(path: impl AsRef<Path>, input_size: u32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("loading ONNX model from {}", path.display()))?;
        Self::from_inference_model(model, input_size)
    }

    pub fn from_bytes(bytes: &[u8], input_size: u32) -> anyhow::Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(bytes))
            .context("decoding ONNX model")?;
        Self::from_inference_model(model, input_size)
    }

    fn from_inference_model(model: InferenceModel, input_size: u32) -> anyhow::Result<Self> {
        let inputs = model.input_outlets().context("listing model inputs")?;
        ensure!(
            inputs.len() == 1,
            "expected a model with a single input, found {}",
            inputs.len()
        );
        let input_name = model.node(inputs[0].node).name.clone();
        let input_shape = [1, 3, input_size as usize, input_size as usize];

        let plan = model
            .with_input_fact(0, f32::fact(input_shape).into())
            .context("setting input shape")?
            .into_optimized()
            .context("optimizing model")?
            .into_runnable()
            .context("building execution plan")?;
        info!("loaded model with input `{input_name}` of shape {input_shape:?}");

        Ok(Self {
            plan,
            input_name,
            input_shape,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }
}

impl Model for OnnxModel {
    fn infer(&self, input: &ImageTensor) -> anyhow::Result<Logits> {
        ensure!(
            input.shape() == self.input_shape,
            "input shape {:?} does not match model input {:?}",
            input.shape(),
            self.input_shape
        );
        let tensor = Tensor::from_shape::<f32>(&input.shape(), input.data())?;
        let outputs = self.plan.run(tvec!(tensor.into()))?;
        let output = outputs.first().context("model produced no output")?;
        let values = output
            .as_slice::<f32>()
            .context("model output is not f32")?
            .to_vec();

        Ok(Logits {
            shape: output.shape().to_vec(),
            values,
        })
    }
}
