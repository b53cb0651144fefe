use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use deeptest::core::db::{NewRecord, PipelineRecord, RecordDb, RecordRepository, RecordUpdate};
use deeptest::detection::fit_within;
use deeptest::detection::preprocessing::{PreprocessedTensor, DETECTOR_INPUT_SIZE};
use deeptest::detection::{ContrastCapability, ImageCodec, PixelCodec};
use deeptest::{InferenceModel, ModelKind, ModelLoader, ModelSelection, PipelineRequest, TestType};
use image::{ImageBuffer, Rgb};
use tempfile::NamedTempFile;
use time::OffsetDateTime;

/// Creates a `width`x`height` gradient PNG and returns the temp file.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image(width: u32, height: u32) -> NamedTempFile {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128u8])
    });
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Creates a RecordDb in a temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_db() -> (RecordDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = RecordDb::open(dir.path().join("results.db"))
        .await
        .expect("Failed to open test database");
    (db, dir)
}

pub fn make_request(image: &Path, selection: ModelSelection) -> PipelineRequest {
    PipelineRequest {
        image_path: image.to_path_buf(),
        name: "Patient A".to_string(),
        test_type: TestType::Swab,
        model_selection: selection,
    }
}

pub fn make_new_record(name: &str, probability: f64) -> NewRecord {
    NewRecord {
        image_ref: "/photos/strip.jpg".to_string(),
        name: name.to_string(),
        test_type: TestType::Scrape,
        model_selection: ModelSelection::Ensemble,
        probability,
        uncertainty: 2.5,
    }
}

/// Detector output row covering the whole source frame
pub fn full_frame_box(width: u32, height: u32) -> Vec<f32> {
    let (w, h) = fit_within(width, height, DETECTOR_INPUT_SIZE);
    vec![0.0, 0.0, w as f32, h as f32, 0.9, 0.0]
}

/// Returns the same output on every pass
pub struct FixedModel(pub Vec<f32>);

impl FixedModel {
    pub fn logit(logit: f32) -> Self {
        Self(vec![logit])
    }
}

impl InferenceModel for FixedModel {
    fn run(&self, _input: &PreprocessedTensor) -> anyhow::Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

pub struct FailingModel;

impl InferenceModel for FailingModel {
    fn run(&self, _input: &PreprocessedTensor) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("session crashed")
    }
}

/// Hands out preset sessions and records every load.
pub struct FakeLoader {
    pub detector: Arc<dyn InferenceModel>,
    pub model1: Arc<dyn InferenceModel>,
    pub model2: Arc<dyn InferenceModel>,
    pub missing: Option<ModelKind>,
    pub loads: Mutex<Vec<ModelKind>>,
}

impl FakeLoader {
    pub fn new(detector: Vec<f32>, logit1: f32, logit2: f32) -> Self {
        Self {
            detector: Arc::new(FixedModel(detector)),
            model1: Arc::new(FixedModel::logit(logit1)),
            model2: Arc::new(FixedModel::logit(logit2)),
            missing: None,
            loads: Mutex::new(Vec::new()),
        }
    }

    pub fn loaded(&self) -> Vec<ModelKind> {
        self.loads.lock().unwrap().clone()
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, kind: ModelKind) -> anyhow::Result<Arc<dyn InferenceModel>> {
        if self.missing == Some(kind) {
            anyhow::bail!("{} model file not found", kind);
        }
        self.loads.lock().unwrap().push(kind);
        Ok(match kind {
            ModelKind::Detector => self.detector.clone(),
            ModelKind::Model1 => self.model1.clone(),
            ModelKind::Model2 => self.model2.clone(),
        })
    }
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PipelineRecord>>,
    pub fail_inserts: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail_inserts: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<PipelineRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RecordRepository for MemoryStore {
    async fn insert(&self, record: NewRecord) -> anyhow::Result<i64> {
        if self.fail_inserts {
            anyhow::bail!("disk full");
        }
        let mut records = self.records.lock().unwrap();
        let id = records.len() as i64 + 1;
        records.push(PipelineRecord {
            id,
            image_ref: record.image_ref,
            name: record.name,
            test_type: record.test_type,
            model_selection: record.model_selection,
            probability: record.probability,
            uncertainty: record.uncertainty,
            timestamp: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<PipelineRecord>> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn get_all(&self) -> anyhow::Result<Vec<PipelineRecord>> {
        Ok(self.records())
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> anyhow::Result<PipelineRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("No record with id {}", id))?;
        if let Some(name) = &update.name {
            record.name = name.clone();
        }
        if let Some(test_type) = update.test_type {
            record.test_type = test_type;
        }
        Ok(record.clone())
    }

    async fn delete(&self, id: i64) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            anyhow::bail!("No record with id {}", id);
        }
        Ok(())
    }
}

/// Contrast capability whose native side is unavailable
pub struct FailingEnhancer;

impl ContrastCapability for FailingEnhancer {
    async fn enhance(&self, _path: &Path) -> anyhow::Result<PathBuf> {
        anyhow::bail!("contrast module not linked")
    }
}

/// Collects progress events
#[derive(Default)]
pub struct ProgressLog(pub Vec<(String, f32)>);

impl ProgressLog {
    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|(label, _)| label.as_str()).collect()
    }

    pub fn fractions(&self) -> Vec<f32> {
        self.0.iter().map(|(_, fraction)| *fraction).collect()
    }
}

impl deeptest::ProgressSink for ProgressLog {
    fn report(&mut self, label: &str, fraction: f32) {
        self.0.push((label.to_string(), fraction));
    }
}

/// Image codec that notes which thread decoded each file, and can refuse
/// to decode once armed
#[derive(Default)]
pub struct RecordingCodec {
    decodes: Mutex<Vec<(PathBuf, std::thread::ThreadId)>>,
    pub fail_decode: std::sync::atomic::AtomicBool,
}

impl RecordingCodec {
    pub fn decodes(&self) -> Vec<(PathBuf, std::thread::ThreadId)> {
        self.decodes.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.decodes.lock().unwrap().clear();
    }
}

impl PixelCodec for RecordingCodec {
    fn decode(&self, path: &Path) -> anyhow::Result<image::RgbaImage> {
        self.decodes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), std::thread::current().id()));
        if self.fail_decode.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("decoder refused {}", path.display());
        }
        ImageCodec.decode(path)
    }

    fn encode(&self, image: &image::RgbaImage, path: &Path) -> anyhow::Result<()> {
        ImageCodec.encode(image, path)
    }
}
