use tracing::debug;

use crate::core::errors::{PipelineError, PipelineResult};
use crate::detection::preprocessing::PreprocessedTensor;
use crate::inference::InferenceModel;
use crate::models::{ModelKind, ModelResult};
use crate::pipeline::CancelToken;

/// Forward passes per classification model
pub const NUM_OF_PASSES: usize = 10;

/// Logistic function scaled to a percentage.
pub fn logit_to_percent(logit: f64) -> f64 {
    100.0 / (1.0 + (-logit).exp())
}

/// Monte Carlo estimate from repeated passes over one unchanged input.
///
/// Variation between passes comes entirely from stochastic layers inside the
/// model; the input tensor is built once and reused.
#[derive(Debug, Clone, Copy)]
pub struct StochasticInferenceEngine {
    passes: usize,
}

impl Default for StochasticInferenceEngine {
    fn default() -> Self {
        Self {
            passes: NUM_OF_PASSES,
        }
    }
}

impl StochasticInferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every pass in order. The first failing pass aborts the whole estimate.
    pub fn run(
        &self,
        kind: ModelKind,
        model: &dyn InferenceModel,
        input: &PreprocessedTensor,
        cancel: &CancelToken,
    ) -> PipelineResult<ModelResult> {
        let mut samples = Vec::with_capacity(self.passes);

        for pass in 0..self.passes {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    step: format!("{} pass {}", kind, pass + 1),
                });
            }

            let output = model
                .run(input)
                .map_err(|source| PipelineError::Inference {
                    model: kind,
                    pass: pass + 1,
                    source,
                })?;
            let logit = *output.first().ok_or_else(|| PipelineError::Inference {
                model: kind,
                pass: pass + 1,
                source: anyhow::anyhow!("model returned an empty output"),
            })?;

            let probability = logit_to_percent(logit as f64);
            debug!(model = %kind, pass = pass + 1, logit, probability, "Inference pass");
            samples.push(probability);
        }

        Ok(summarize(samples))
    }
}

/// Mean and population standard deviation
pub fn summarize(samples: Vec<f64>) -> ModelResult {
    let n = samples.len().max(1) as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    ModelResult {
        mean,
        std_dev: variance.sqrt(),
        samples,
    }
}
