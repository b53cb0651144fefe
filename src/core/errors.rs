// Error types for the diagnosis pipeline
//
// Stage-level failures are typed so the orchestrator can tell the one
// recoverable case (contrast enhancement) apart from the fatal ones.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::{ModelKind, RegionOfInterest};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load {model} model: {source}")]
    ModelLoad {
        model: ModelKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Cannot crop degenerate region {roi}")]
    Crop { roi: RegionOfInterest },

    #[error("Contrast enhancement failed for {path:?}: {source}")]
    Enhancement {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Inference pass {pass} of {model} failed: {source}")]
    Inference {
        model: ModelKind,
        pass: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write result record: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("Image I/O failed for {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("No probability or uncertainty was produced before persisting")]
    MissingEstimate,

    #[error("Pipeline cancelled before {step}")]
    Cancelled { step: String },

    #[error("Step \"{step}\" is not part of this run's plan")]
    StepNotPlanned { step: &'static str },

    #[error("Working directory error: {0}")]
    WorkDir(#[from] std::io::Error),
}

impl PipelineError {
    /// Only enhancement failures are recovered inside their stage.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Enhancement { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Threshold for {selection} must be a finite percentage in [0, 100], got {value}")]
    InvalidThreshold { selection: &'static str, value: f64 },

    #[error("Models directory does not exist: {0:?}")]
    MissingModelsDir(PathBuf),

    #[error("Environment variable {name} could not be parsed: {value}")]
    EnvVarError { name: &'static str, value: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
