use crate::core::config::ThresholdConfig;
use crate::models::{Estimate, Label, ModelResult, ModelSelection};

pub const MODEL1_WEIGHT: f64 = 0.7;
pub const MODEL2_WEIGHT: f64 = 0.3;

/// Fold model 2's result into whatever has been accumulated so far.
///
/// Without a model 1 estimate the model 2 result is taken unmodified;
/// otherwise both channels get the fixed 0.7/0.3 weighting.
pub fn combine(model1: Option<Estimate>, model2: &ModelResult) -> Estimate {
    let model2 = Estimate::from(model2);
    match model1 {
        None => model2,
        Some(model1) => Estimate {
            probability: MODEL1_WEIGHT * model1.probability + MODEL2_WEIGHT * model2.probability,
            uncertainty: MODEL1_WEIGHT * model1.uncertainty + MODEL2_WEIGHT * model2.uncertainty,
        },
    }
}

pub fn classify(probability: f64, selection: ModelSelection, thresholds: &ThresholdConfig) -> Label {
    if probability >= thresholds.for_selection(selection) {
        Label::Positive
    } else {
        Label::Negative
    }
}
