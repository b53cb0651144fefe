pub mod contrast;
pub mod coords;
pub mod preprocessing;
pub mod transform;

use image::{imageops, DynamicImage, RgbaImage};
use tracing::{debug, info, warn};

use crate::core::errors::{PipelineError, PipelineResult};
use crate::inference::InferenceModel;
use crate::models::{DetectionCandidate, RegionOfInterest};
use preprocessing::{to_tensor, Normalization, DETECTOR_INPUT_SIZE};

pub use contrast::{ContrastCapability, ContrastEnhancer, Enhancement, HistogramEqualizer};
pub use coords::map_to_source;
pub use transform::{ImageCodec, ImageTransformStage, PixelCodec, WorkingImage, Workspace};

/// Scores below this are logged as suspicious but still used.
pub const LOW_CONFIDENCE_SCORE: f32 = 0.25;

/// Best region found by one detector pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub candidate: DetectionCandidate,
    /// Row of the candidate in the detector output
    pub index: usize,
    /// Size the source was resized to before padding to the detector input
    pub resized: (u32, u32),
    pub roi: RegionOfInterest,
}

/// Split flat detector output into stride-6 rows.
pub fn parse_candidates(output: &[f32]) -> PipelineResult<Vec<DetectionCandidate>> {
    if output.len() % DetectionCandidate::STRIDE != 0 {
        return Err(PipelineError::Detection(format!(
            "output length {} is not a multiple of {}",
            output.len(),
            DetectionCandidate::STRIDE
        )));
    }
    Ok(output
        .chunks_exact(DetectionCandidate::STRIDE)
        .filter_map(DetectionCandidate::from_row)
        .collect())
}

/// Highest score wins; on a tie the earliest row is kept. NaN scores lose to
/// everything.
pub fn select_best(candidates: &[DetectionCandidate]) -> Option<(usize, DetectionCandidate)> {
    let score = |c: &DetectionCandidate| if c.score.is_nan() { f32::NEG_INFINITY } else { c.score };

    let mut iter = candidates.iter().enumerate();
    let (mut best_idx, mut best) = iter.next()?;
    for (idx, candidate) in iter {
        if score(candidate) > score(best) {
            best_idx = idx;
            best = candidate;
        }
    }
    Some((best_idx, *best))
}

/// Largest size with the aspect ratio of `(width, height)` that fits in `bound`x`bound`
pub fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let scale = (bound as f32 / width.max(1) as f32).min(bound as f32 / height.max(1) as f32);
    let w = ((width as f32 * scale).round() as u32).clamp(1, bound);
    let h = ((height as f32 * scale).round() as u32).clamp(1, bound);
    (w, h)
}

/// Locates the single test-strip region in a photo.
///
/// No score threshold and no non-maximum suppression: one region per image
/// is assumed and the top-scoring row is taken.
pub struct RegionDetector<'a> {
    model: &'a dyn InferenceModel,
}

impl<'a> RegionDetector<'a> {
    pub fn new(model: &'a dyn InferenceModel) -> Self {
        Self { model }
    }

    pub fn detect(&self, source: &RgbaImage) -> PipelineResult<Detection> {
        let (source_w, source_h) = source.dimensions();
        if source_w == 0 || source_h == 0 {
            return Err(PipelineError::Detection(format!(
                "source image is {}x{}",
                source_w, source_h
            )));
        }

        let resized = fit_within(source_w, source_h, DETECTOR_INPUT_SIZE);
        let scaled = imageops::resize(source, resized.0, resized.1, imageops::FilterType::Triangle);
        let rgb = DynamicImage::ImageRgba8(scaled).to_rgb8();
        let tensor = to_tensor(
            &rgb,
            (DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE),
            Normalization::Detector,
        );

        let output = self
            .model
            .run(&tensor)
            .map_err(|e| PipelineError::Detection(format!("detector pass failed: {e:#}")))?;
        let candidates = parse_candidates(&output)?;
        debug!(count = candidates.len(), "Detector returned candidates");

        let (index, candidate) = select_best(&candidates)
            .ok_or_else(|| PipelineError::Detection("detector returned no candidates".to_string()))?;

        if candidate.score.is_nan() || candidate.score < LOW_CONFIDENCE_SCORE {
            warn!(score = candidate.score, "Best detection has low confidence");
        }

        let roi = map_to_source(&candidate, resized, (source_w, source_h));
        info!(index, score = candidate.score, %roi, "Selected region of interest");

        Ok(Detection {
            candidate,
            index,
            resized,
            roi,
        })
    }
}
