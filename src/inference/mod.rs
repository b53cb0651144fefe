pub mod ensemble;
pub mod stochastic;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, Tensor};
use tracing::info;

use crate::core::config::ModelConfig;
use crate::detection::preprocessing::PreprocessedTensor;
use crate::models::ModelKind;

pub use ensemble::{classify, combine, MODEL1_WEIGHT, MODEL2_WEIGHT};
pub use stochastic::{logit_to_percent, StochasticInferenceEngine, NUM_OF_PASSES};

/// A loaded model session.
///
/// `run` performs one forward pass and returns the first output flattened.
pub trait InferenceModel: Send + Sync {
    fn run(&self, input: &PreprocessedTensor) -> anyhow::Result<Vec<f32>>;
}

/// Source of model sessions, consulted once per pipeline run.
pub trait ModelLoader: Send + Sync {
    fn load(&self, kind: ModelKind) -> anyhow::Result<Arc<dyn InferenceModel>>;
}

/// Session backed by an `rten` model file
pub struct RtenModel {
    model: Model,
}

impl RtenModel {
    pub fn load_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }
        let model = Model::load_file(path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        Ok(Self { model })
    }
}

impl InferenceModel for RtenModel {
    fn run(&self, input: &PreprocessedTensor) -> anyhow::Result<Vec<f32>> {
        let tensor = NdTensor::from_data(input.shape, input.data.clone());
        let output = self
            .model
            .run_one(tensor.view().into(), None)
            .context("Forward pass failed")?;
        let output: Tensor<f32> = output
            .try_into()
            .map_err(|e| anyhow::anyhow!("Unexpected model output type: {:?}", e))?;
        Ok(output.to_vec())
    }
}

/// Loads the three model files named in [`ModelConfig`].
pub struct RtenModelLoader {
    config: ModelConfig,
}

impl RtenModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn path_for(&self, kind: ModelKind) -> PathBuf {
        let file = match kind {
            ModelKind::Detector => &self.config.detector_file,
            ModelKind::Model1 => &self.config.model1_file,
            ModelKind::Model2 => &self.config.model2_file,
        };
        self.config.models_dir.join(file)
    }
}

impl ModelLoader for RtenModelLoader {
    fn load(&self, kind: ModelKind) -> anyhow::Result<Arc<dyn InferenceModel>> {
        let path = self.path_for(kind);
        info!(model = %kind, path = %path.display(), "Loading model session");
        Ok(Arc::new(RtenModel::load_file(path)?))
    }
}
