use std::future::Future;

use time::OffsetDateTime;

use crate::core::config::ThresholdConfig;
use crate::inference::classify;
use crate::models::{Label, ModelSelection, TestType};

/// A persisted pipeline result
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRecord {
    pub id: i64,
    pub image_ref: String,
    pub name: String,
    pub test_type: TestType,
    pub model_selection: ModelSelection,
    /// Percent, `[0, 100]`
    pub probability: f64,
    pub uncertainty: f64,
    pub timestamp: OffsetDateTime,
}

impl PipelineRecord {
    pub fn label(&self, thresholds: &ThresholdConfig) -> Label {
        classify(self.probability, self.model_selection, thresholds)
    }
}

/// Record as written by the pipeline; id and timestamp come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub image_ref: String,
    pub name: String,
    pub test_type: TestType,
    pub model_selection: ModelSelection,
    pub probability: f64,
    pub uncertainty: f64,
}

/// The fields a user may change after the fact
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub name: Option<String>,
    pub test_type: Option<TestType>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.test_type.is_none()
    }
}

pub trait RecordRepository {
    fn insert(&self, record: NewRecord) -> impl Future<Output = anyhow::Result<i64>>;
    fn get(&self, id: i64) -> impl Future<Output = anyhow::Result<Option<PipelineRecord>>>;
    fn get_all(&self) -> impl Future<Output = anyhow::Result<Vec<PipelineRecord>>>;
    fn update(&self, id: i64, update: &RecordUpdate) -> impl Future<Output = anyhow::Result<PipelineRecord>>;
    fn delete(&self, id: i64) -> impl Future<Output = anyhow::Result<()>>;
}
