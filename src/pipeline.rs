use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use image::DynamicImage;
use tracing::{debug, error, info, warn};

use crate::core::config::ThresholdConfig;
use crate::core::db::{NewRecord, RecordRepository};
use crate::core::errors::{PipelineError, PipelineResult};
use crate::detection::preprocessing::{to_tensor, Normalization, PreprocessedTensor, CLASSIFIER_INPUT_SIZE};
use crate::detection::{
    ContrastCapability, ContrastEnhancer, ImageCodec, ImageTransformStage, PixelCodec,
    RegionDetector, WorkingImage, Workspace,
};
use crate::inference::{classify, combine, InferenceModel, ModelLoader, StochasticInferenceEngine};
use crate::models::{Estimate, Label, ModelKind, ModelResult, ModelSelection, RegionOfInterest, TestType};

/// Shared cancellation flag.
///
/// Checked by the orchestrator before every step and by the inference engine
/// between passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives `(label, fraction)` once per completed step, in order.
pub trait ProgressSink {
    fn report(&mut self, label: &str, fraction: f32);
}

impl<F: FnMut(&str, f32)> ProgressSink for F {
    fn report(&mut self, label: &str, fraction: f32) {
        self(label, fraction)
    }
}

/// Discards progress events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _label: &str, _fraction: f32) {}
}

/// Tagged operations of a run plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    DetectRegionAndCrop,
    EnhanceContrast,
    RunModel1,
    RunModel2,
    Persist,
}

impl PipelineStep {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::DetectRegionAndCrop => "Detecting region and cropping",
            PipelineStep::EnhanceContrast => "Applying contrast equalisation",
            PipelineStep::RunModel1 => "Running model 1",
            PipelineStep::RunModel2 => "Running model 2",
            PipelineStep::Persist => "Writing results to storage",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            PipelineStep::DetectRegionAndCrop => "detect_crop",
            PipelineStep::EnhanceContrast => "contrast",
            PipelineStep::RunModel1 => "model1",
            PipelineStep::RunModel2 => "model2",
            PipelineStep::Persist => "persist",
        }
    }
}

/// Ordered step plan for a model selection. The only place that branches on
/// the selection.
pub fn plan(selection: ModelSelection) -> Vec<PipelineStep> {
    let mut steps = vec![PipelineStep::DetectRegionAndCrop, PipelineStep::EnhanceContrast];
    if selection.runs_model1() {
        steps.push(PipelineStep::RunModel1);
    }
    if selection.runs_model2() {
        steps.push(PipelineStep::RunModel2);
    }
    steps.push(PipelineStep::Persist);
    steps
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    RunningStep(usize),
    Completed,
    Failed,
}

/// What the caller asks the pipeline to diagnose
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub image_path: PathBuf,
    pub name: String,
    pub test_type: TestType,
    pub model_selection: ModelSelection,
}

/// Model sessions for one run; only the ones the plan needs are loaded.
struct Sessions {
    detector: Option<Arc<dyn InferenceModel>>,
    model1: Option<Arc<dyn InferenceModel>>,
    model2: Option<Arc<dyn InferenceModel>>,
}

impl Sessions {
    fn get(&self, kind: ModelKind) -> PipelineResult<Arc<dyn InferenceModel>> {
        let session = match kind {
            ModelKind::Detector => &self.detector,
            ModelKind::Model1 => &self.model1,
            ModelKind::Model2 => &self.model2,
        };
        session.clone().ok_or_else(|| PipelineError::ModelLoad {
            model: kind,
            source: anyhow::anyhow!("session was not loaded for this run"),
        })
    }
}

/// Everything one run accumulates, threaded through each step.
///
/// Dropping the context removes the run's workspace and every temporary
/// image in it.
pub struct PipelineContext {
    pub request: PipelineRequest,
    pub roi: Option<RegionOfInterest>,
    pub model1: Option<ModelResult>,
    pub model2: Option<ModelResult>,
    pub estimate: Option<Estimate>,
    pub enhanced: bool,
    pub record_id: Option<i64>,
    plan: Vec<PipelineStep>,
    state: PipelineState,
    working: Option<WorkingImage>,
    sessions: Sessions,
    workspace: Workspace,
}

impl PipelineContext {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Steps this run executes, in order
    pub fn plan(&self) -> &[PipelineStep] {
        &self.plan
    }

    pub fn working_path(&self) -> Option<&Path> {
        self.working.as_ref().map(|w| w.path())
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    fn take_working(&mut self) -> PipelineResult<WorkingImage> {
        self.working.take().ok_or_else(|| {
            PipelineError::Detection("no working image; the region has not been cropped".to_string())
        })
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub record_id: i64,
    pub record: NewRecord,
    pub roi: RegionOfInterest,
    pub model1: Option<ModelResult>,
    pub model2: Option<ModelResult>,
    pub enhanced: bool,
    pub label: Label,
    pub state: PipelineState,
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Test-strip diagnosis pipeline.
///
/// Sequences detection, contrast enhancement, stochastic inference and
/// persistence over a single working image.
pub struct Pipeline<S, E> {
    loader: Arc<dyn ModelLoader>,
    codec: Arc<dyn PixelCodec>,
    enhancer: E,
    store: S,
    engine: StochasticInferenceEngine,
    thresholds: ThresholdConfig,
    work_dir: PathBuf,
    debug: Option<DebugConfig>,
}

impl<S: RecordRepository, E: ContrastCapability> Pipeline<S, E> {
    pub fn new(loader: Arc<dyn ModelLoader>, store: S, enhancer: E) -> Self {
        Self {
            loader,
            codec: Arc::new(ImageCodec),
            enhancer,
            store,
            engine: StochasticInferenceEngine::new(),
            thresholds: ThresholdConfig::default(),
            work_dir: std::env::temp_dir(),
            debug: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn PixelCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Parent directory for per-run workspaces
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Load the sessions the plan needs and create the run's workspace.
    pub fn prepare(&self, request: PipelineRequest) -> PipelineResult<PipelineContext> {
        let selection = request.model_selection;
        let load = |kind: ModelKind| {
            self.loader
                .load(kind)
                .map_err(|source| PipelineError::ModelLoad { model: kind, source })
        };

        let sessions = Sessions {
            detector: Some(load(ModelKind::Detector)?),
            model1: selection.runs_model1().then(|| load(ModelKind::Model1)).transpose()?,
            model2: selection.runs_model2().then(|| load(ModelKind::Model2)).transpose()?,
        };

        fs::create_dir_all(&self.work_dir)?;
        let workspace = Workspace::new_in(&self.work_dir)?;
        debug!(path = %workspace.path().display(), "Created run workspace");

        Ok(PipelineContext {
            working: Some(WorkingImage::source(&request.image_path)),
            plan: plan(selection),
            request,
            state: PipelineState::Idle,
            roi: None,
            model1: None,
            model2: None,
            estimate: None,
            enhanced: false,
            record_id: None,
            sessions,
            workspace,
        })
    }

    /// Run the whole plan for `request`.
    ///
    /// The first failing step (other than contrast enhancement, which
    /// recovers itself) aborts the run; nothing is persisted in that case.
    pub async fn run(
        &self,
        request: PipelineRequest,
        progress: &mut impl ProgressSink,
        cancel: &CancelToken,
    ) -> PipelineResult<PipelineOutcome> {
        info!(
            image = %request.image_path.display(),
            selection = %request.model_selection,
            "Starting pipeline"
        );

        let mut ctx = self.prepare(request)?;
        self.save_debug_input(&ctx);

        let steps = ctx.plan.clone();
        let total = steps.len();
        for (idx, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                ctx.state = PipelineState::Failed;
                warn!(step = step.label(), state = ?ctx.state, "Pipeline cancelled");
                return Err(PipelineError::Cancelled {
                    step: step.label().to_string(),
                });
            }

            info!(step = step.label(), index = idx + 1, total, "Running step");
            if let Err(e) = self.run_step(step, &mut ctx, cancel).await {
                error!(step = step.label(), state = ?ctx.state, error = %e, "Pipeline step failed");
                return Err(e);
            }

            self.save_debug_output(&ctx, idx, step);
            progress.report(step.label(), (idx + 1) as f32 / total as f32);
        }

        self.outcome(&ctx)
    }

    /// Execute a single step against `ctx`.
    ///
    /// Moves the context to `RunningStep(i)` for the step's position in the
    /// plan, to `Failed` if the step errors, and to `Completed` once the last
    /// step succeeds.
    pub async fn run_step(
        &self,
        step: &PipelineStep,
        ctx: &mut PipelineContext,
        cancel: &CancelToken,
    ) -> PipelineResult<()> {
        let idx = ctx
            .plan
            .iter()
            .position(|planned| planned == step)
            .ok_or(PipelineError::StepNotPlanned { step: step.label() })?;
        ctx.state = PipelineState::RunningStep(idx);

        match self.execute(step, ctx, cancel).await {
            Ok(()) => {
                if idx + 1 == ctx.plan.len() {
                    ctx.state = PipelineState::Completed;
                }
                Ok(())
            }
            Err(e) => {
                ctx.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        step: &PipelineStep,
        ctx: &mut PipelineContext,
        cancel: &CancelToken,
    ) -> PipelineResult<()> {
        match step {
            PipelineStep::DetectRegionAndCrop => self.detect_and_crop(ctx).await,
            PipelineStep::EnhanceContrast => {
                let input = ctx.take_working()?;
                let enhancement = ContrastEnhancer::new(&self.enhancer).apply(input).await;
                ctx.enhanced = enhancement.is_applied();
                ctx.working = Some(enhancement.into_image());
                Ok(())
            }
            PipelineStep::RunModel1 => {
                let result = self.run_model(ModelKind::Model1, ctx, cancel).await?;
                ctx.estimate = Some(Estimate::from(&result));
                ctx.model1 = Some(result);
                Ok(())
            }
            PipelineStep::RunModel2 => {
                let result = self.run_model(ModelKind::Model2, ctx, cancel).await?;
                let prior = ctx.model1.as_ref().map(Estimate::from);
                ctx.estimate = Some(combine(prior, &result));
                ctx.model2 = Some(result);
                Ok(())
            }
            PipelineStep::Persist => self.persist(ctx).await,
        }
    }

    async fn detect_and_crop(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let input = ctx.take_working()?;
        let pixels = self
            .codec
            .decode(input.path())
            .map_err(|source| PipelineError::Decode {
                path: input.path().to_path_buf(),
                source,
            })?;

        let detector = ctx.sessions.get(ModelKind::Detector)?;
        let detection = tokio::task::spawn_blocking(move || {
            RegionDetector::new(detector.as_ref()).detect(&pixels)
        })
        .await
        .map_err(|e| PipelineError::Detection(format!("detector task failed: {e}")))??;

        let stage = ImageTransformStage::new(self.codec.as_ref(), &ctx.workspace);
        let cropped = stage.crop(input, detection.roi)?;
        let boxed = stage.letterbox(cropped, CLASSIFIER_INPUT_SIZE)?;

        ctx.roi = Some(detection.roi);
        ctx.working = Some(boxed);
        Ok(())
    }

    async fn run_model(
        &self,
        kind: ModelKind,
        ctx: &PipelineContext,
        cancel: &CancelToken,
    ) -> PipelineResult<ModelResult> {
        let model = ctx.sessions.get(kind)?;
        let path = ctx
            .working_path()
            .ok_or_else(|| {
                PipelineError::Detection("no working image; the region has not been cropped".to_string())
            })?
            .to_path_buf();
        let codec = Arc::clone(&self.codec);
        let engine = self.engine;
        let cancel = cancel.clone();

        let result = tokio::task::spawn_blocking(move || {
            let tensor = classifier_input(codec.as_ref(), &path)?;
            engine.run(kind, model.as_ref(), &tensor, &cancel)
        })
        .await
        .map_err(|e| PipelineError::Inference {
            model: kind,
            pass: 0,
            source: anyhow::Error::new(e),
        })??;

        info!(
            model = %kind,
            probability = result.mean,
            uncertainty = result.std_dev,
            "Model estimate"
        );
        Ok(result)
    }

    async fn persist(&self, ctx: &mut PipelineContext) -> PipelineResult<()> {
        let estimate = ctx.estimate.ok_or(PipelineError::MissingEstimate)?;
        let record = self.new_record(ctx, estimate);
        let id = self
            .store
            .insert(record)
            .await
            .map_err(PipelineError::Persistence)?;
        info!(id, "Stored pipeline result");
        ctx.record_id = Some(id);
        Ok(())
    }

    fn new_record(&self, ctx: &PipelineContext, estimate: Estimate) -> NewRecord {
        NewRecord {
            image_ref: ctx.request.image_path.display().to_string(),
            name: ctx.request.name.clone(),
            test_type: ctx.request.test_type,
            model_selection: ctx.request.model_selection,
            probability: estimate.probability,
            uncertainty: estimate.uncertainty,
        }
    }

    fn outcome(&self, ctx: &PipelineContext) -> PipelineResult<PipelineOutcome> {
        let estimate = ctx.estimate.ok_or(PipelineError::MissingEstimate)?;
        let record_id = ctx.record_id.ok_or_else(|| {
            PipelineError::Persistence(anyhow::anyhow!("run completed without a stored record"))
        })?;
        let roi = ctx
            .roi
            .ok_or_else(|| PipelineError::Detection("run completed without a region".to_string()))?;

        let label = classify(estimate.probability, ctx.request.model_selection, &self.thresholds);
        info!(record_id, probability = estimate.probability, %label, "Pipeline completed");

        Ok(PipelineOutcome {
            record_id,
            record: self.new_record(ctx, estimate),
            roi,
            model1: ctx.model1.clone(),
            model2: ctx.model2.clone(),
            enhanced: ctx.enhanced,
            label,
            state: ctx.state,
        })
    }

    fn save_debug_input(&self, ctx: &PipelineContext) {
        let Some(debug_config) = &self.debug else {
            return;
        };
        let source = &ctx.request.image_path;
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("img");
        let target = debug_config.output_dir.join(format!("00_input.{}", ext));
        match fs::copy(source, &target) {
            Ok(_) => debug!(path = %target.display(), "Debug: saved input"),
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to save debug input"),
        }
    }

    fn save_debug_output(&self, ctx: &PipelineContext, idx: usize, step: &PipelineStep) {
        let Some(debug_config) = &self.debug else {
            return;
        };
        let Some(working) = ctx.working_path() else {
            return;
        };
        let target = debug_config
            .output_dir
            .join(format!("{:02}_{}.png", idx + 1, step.slug()));
        match fs::copy(working, &target) {
            Ok(_) => debug!(path = %target.display(), "Debug: saved step output"),
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to save debug output"),
        }
    }
}

/// Built once per model; every pass sees the same tensor.
fn classifier_input(codec: &dyn PixelCodec, path: &Path) -> PipelineResult<PreprocessedTensor> {
    let pixels = codec.decode(path).map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = DynamicImage::ImageRgba8(pixels).to_rgb8();
    Ok(to_tensor(
        &rgb,
        (CLASSIFIER_INPUT_SIZE, CLASSIFIER_INPUT_SIZE),
        Normalization::Classifier,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_includes_only_selected_models() {
        assert_eq!(
            plan(ModelSelection::Model1),
            vec![
                PipelineStep::DetectRegionAndCrop,
                PipelineStep::EnhanceContrast,
                PipelineStep::RunModel1,
                PipelineStep::Persist
            ]
        );
        assert_eq!(
            plan(ModelSelection::Model2),
            vec![
                PipelineStep::DetectRegionAndCrop,
                PipelineStep::EnhanceContrast,
                PipelineStep::RunModel2,
                PipelineStep::Persist
            ]
        );
        let ensemble = plan(ModelSelection::Ensemble);
        assert_eq!(ensemble.len(), 5);
        assert_eq!(ensemble[2], PipelineStep::RunModel1);
        assert_eq!(ensemble[3], PipelineStep::RunModel2);
    }

    #[test]
    fn persist_is_always_last() {
        for selection in [ModelSelection::Model1, ModelSelection::Model2, ModelSelection::Ensemble] {
            assert_eq!(plan(selection).last(), Some(&PipelineStep::Persist));
        }
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn closures_are_progress_sinks() {
        let mut seen = Vec::new();
        let mut sink = |label: &str, fraction: f32| seen.push((label.to_string(), fraction));
        sink.report("a", 0.5);
        assert_eq!(seen, vec![("a".to_string(), 0.5)]);
    }
}
