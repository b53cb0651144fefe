use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// One detector output row `[x1, y1, x2, y2, score, class_id]` in detector-input space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionCandidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: f32,
}

impl DetectionCandidate {
    /// Number of floats per detector output row
    pub const STRIDE: usize = 6;

    pub fn from_row(row: &[f32]) -> Option<Self> {
        match *row {
            [x1, y1, x2, y2, score, class_id] => Some(Self {
                x1,
                y1,
                x2,
                y2,
                score,
                class_id,
            }),
            _ => None,
        }
    }
}

/// Rectangle in source-image pixels.
///
/// Always satisfies `x + width <= source_width` and `y + height <= source_height`
/// for the image it was mapped onto. Width or height may be zero when the
/// detector degenerates; the crop stage rejects such regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionOfInterest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionOfInterest {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for RegionOfInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Summary of the stochastic passes of one classification model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResult {
    /// Arithmetic mean of `samples`, in percent
    pub mean: f64,
    /// Population standard deviation of `samples`
    pub std_dev: f64,
    /// One probability in `[0, 100]` per forward pass
    pub samples: Vec<f64>,
}

/// Probability and uncertainty as accumulated by the model steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub probability: f64,
    pub uncertainty: f64,
}

impl From<&ModelResult> for Estimate {
    fn from(result: &ModelResult) -> Self {
        Self {
            probability: result.mean,
            uncertainty: result.std_dev,
        }
    }
}

/// Which classification model(s) a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSelection {
    Model1,
    Model2,
    Ensemble,
}

impl ModelSelection {
    pub fn runs_model1(self) -> bool {
        matches!(self, ModelSelection::Model1 | ModelSelection::Ensemble)
    }

    pub fn runs_model2(self) -> bool {
        matches!(self, ModelSelection::Model2 | ModelSelection::Ensemble)
    }

    pub fn label(self) -> &'static str {
        match self {
            ModelSelection::Model1 => "Model 1",
            ModelSelection::Model2 => "Model 2",
            ModelSelection::Ensemble => "Ensemble",
        }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<i64> for ModelSelection {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ModelSelection::Model1),
            2 => Ok(ModelSelection::Model2),
            3 => Ok(ModelSelection::Ensemble),
            _ => Err(anyhow::anyhow!("Invalid model selection: {}", value)),
        }
    }
}

impl From<ModelSelection> for i64 {
    fn from(selection: ModelSelection) -> Self {
        match selection {
            ModelSelection::Model1 => 1,
            ModelSelection::Model2 => 2,
            ModelSelection::Ensemble => 3,
        }
    }
}

/// Kind of sample the strip was run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestType {
    Scrape,
    Swab,
}

impl TestType {
    pub fn label(self) -> &'static str {
        match self {
            TestType::Scrape => "Scrape",
            TestType::Swab => "Swab",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TestType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "scrape" => Ok(TestType::Scrape),
            "2" | "swab" => Ok(TestType::Swab),
            other => Err(anyhow::anyhow!("Invalid test type: {}", other)),
        }
    }
}

impl TryFrom<i64> for TestType {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TestType::Scrape),
            2 => Ok(TestType::Swab),
            _ => Err(anyhow::anyhow!("Invalid test type value: {}", value)),
        }
    }
}

impl From<TestType> for i64 {
    fn from(test_type: TestType) -> Self {
        match test_type {
            TestType::Scrape => 1,
            TestType::Swab => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
    Positive,
    Negative,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Positive => f.write_str("Positive"),
            Label::Negative => f.write_str("Negative"),
        }
    }
}

/// Models a run may need a session for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Detector,
    Model1,
    Model2,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Detector => f.write_str("detector"),
            ModelKind::Model1 => f.write_str("model 1"),
            ModelKind::Model2 => f.write_str("model 2"),
        }
    }
}
