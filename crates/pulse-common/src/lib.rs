pub mod config;
pub mod logging;

pub const APP_NAME: &str = "PULSE";

pub use config::{ConfigError, ModelConfig, ModelProvider, PipelineConfig, PulseConfig};
