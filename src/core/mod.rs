pub mod config;
pub mod db;
pub mod errors;

pub use config::Config;
pub use errors::{ConfigError, PipelineError, PipelineResult};
