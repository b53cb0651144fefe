pub mod core;
pub mod detection;
pub mod inference;
pub mod models;
pub mod pipeline;

pub use crate::core::db::{NewRecord, PipelineRecord, RecordDb, RecordRepository, RecordUpdate};
pub use crate::core::{Config, ConfigError, PipelineError, PipelineResult};
pub use detection::{HistogramEqualizer, ImageCodec, RegionDetector};
pub use inference::{InferenceModel, ModelLoader, RtenModelLoader, StochasticInferenceEngine};
pub use models::{Estimate, Label, ModelKind, ModelResult, ModelSelection, RegionOfInterest, TestType};
pub use pipeline::{
    plan, CancelToken, NoProgress, Pipeline, PipelineContext, PipelineOutcome, PipelineRequest,
    PipelineState, PipelineStep, ProgressSink,
};
