use std::env;
use std::path::PathBuf;

use tracing::Level;

use crate::core::errors::{ConfigError, ConfigResult};
use crate::models::ModelSelection;

/// Locations of the model files
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub models_dir: PathBuf,
    pub detector_file: String,
    pub model1_file: String,
    pub model2_file: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            detector_file: "yolo.rten".to_string(),
            model1_file: "efficientnet.rten".to_string(),
            model2_file: "shufflenet.rten".to_string(),
        }
    }
}

/// Decision thresholds, in percent, one per model selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub model1: f64,
    pub model2: f64,
    pub ensemble: f64,
}

impl ThresholdConfig {
    pub fn for_selection(&self, selection: ModelSelection) -> f64 {
        match selection {
            ModelSelection::Model1 => self.model1,
            ModelSelection::Model2 => self.model2,
            ModelSelection::Ensemble => self.ensemble,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            model1: 56.0,
            model2: 47.0,
            ensemble: 53.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Parent directory for the per-run scratch directories
    pub work_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("deeptest.db"),
            work_dir: env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub models: ModelConfig,
    pub thresholds: ThresholdConfig,
    pub storage: StorageConfig,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            thresholds: ThresholdConfig::default(),
            storage: StorageConfig::default(),
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Defaults overlaid with `DEEPTEST_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DEEPTEST_MODELS_DIR") {
            config.models.models_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("DEEPTEST_DB") {
            config.storage.database_path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("DEEPTEST_WORK_DIR") {
            config.storage.work_dir = PathBuf::from(dir);
        }
        if let Some(value) = parse_env_f64("DEEPTEST_THRESHOLD_M1")? {
            config.thresholds.model1 = value;
        }
        if let Some(value) = parse_env_f64("DEEPTEST_THRESHOLD_M2")? {
            config.thresholds.model2 = value;
        }
        if let Some(value) = parse_env_f64("DEEPTEST_THRESHOLD_ENSEMBLE")? {
            config.thresholds.ensemble = value;
        }
        if let Ok(level) = env::var("DEEPTEST_LOG_LEVEL") {
            config.log_level = parse_level(&level).ok_or(ConfigError::EnvVarError {
                name: "DEEPTEST_LOG_LEVEL",
                value: level,
            })?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("model 1", self.thresholds.model1),
            ("model 2", self.thresholds.model2),
            ("ensemble", self.thresholds.ensemble),
        ];
        for (selection, value) in checks {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { selection, value });
            }
        }
        Ok(())
    }

    /// Only needed by commands that actually load models.
    pub fn validate_models_dir(&self) -> ConfigResult<()> {
        if !self.models.models_dir.is_dir() {
            return Err(ConfigError::MissingModelsDir(self.models.models_dir.clone()));
        }
        Ok(())
    }
}

fn parse_env_f64(name: &'static str) -> ConfigResult<Option<f64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarError { name, value }),
        Err(_) => Ok(None),
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}
