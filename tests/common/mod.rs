mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from deeptest for tests
pub use deeptest::core::db::{NewRecord, PipelineRecord, RecordDb, RecordRepository, RecordUpdate};
pub use deeptest::{
    CancelToken, ModelKind, ModelSelection, Pipeline, PipelineError, PipelineRequest, TestType,
};
