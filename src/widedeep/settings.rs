//! Runtime settings for streaming and training.
//!
//! Settings are an explicit value built by the caller and handed to the
//! components that need them. Nothing here is process-global.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Rows read from disk per chunk.
    pub chunk_size: usize,

    /// Rows per optimisation step.
    pub batch_size: usize,

    /// Batches buffered by the background reader. 0 reads on the training thread.
    pub prefetch: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            batch_size: 32,
            prefetch: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub learning_rate: f64,
    pub n_epochs: usize,
    /// Seed for parameter initialisation.
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            n_epochs: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub stream: StreamSettings,
    pub training: TrainingSettings,
}

impl Settings {
    /// Build settings from defaults, an optional `.env` file and
    /// `WIDEDEEP__SECTION__KEY` environment variables, in that order.
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name(".env").required(false))
            .add_source(Environment::with_prefix("WIDEDEEP").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Build settings from defaults overlaid with a single config file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = Self::default();
        Config::builder()
            .set_default("stream.chunk_size", defaults.stream.chunk_size as i64)?
            .set_default("stream.batch_size", defaults.stream.batch_size as i64)?
            .set_default("stream.prefetch", defaults.stream.prefetch as i64)?
            .set_default("training.learning_rate", defaults.training.learning_rate)?
            .set_default("training.n_epochs", defaults.training.n_epochs as i64)?
            .set_default("training.seed", defaults.training.seed as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.stream.chunk_size, 1000);
        assert_eq!(settings.stream.batch_size, 32);
        assert_eq!(settings.stream.prefetch, 2);
        assert_eq!(settings.training.n_epochs, 1);
        assert_eq!(settings.training.seed, 42);
        assert!((settings.training.learning_rate - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_settings_new_falls_back_to_defaults() {
        let settings = Settings::new().unwrap_or_else(|_| Settings::default());
        assert!(settings.stream.chunk_size > 0);
        assert!(settings.stream.batch_size > 0);
    }

    #[test]
    fn test_settings_from_file_overrides() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "[stream]\nchunk_size = 20\nbatch_size = 10\n").unwrap();

        let settings = Settings::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.stream.chunk_size, 20);
        assert_eq!(settings.stream.batch_size, 10);
        // untouched keys keep their defaults
        assert_eq!(settings.stream.prefetch, 2);
        assert_eq!(settings.training.seed, 42);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();

        let json = serde_json::to_string(&settings).expect("Should serialize to JSON");
        assert!(json.contains("chunk_size"));
        assert!(json.contains("learning_rate"));

        let deserialized: Settings =
            serde_json::from_str(&json).expect("Should deserialize from JSON");
        assert_eq!(deserialized.stream.chunk_size, settings.stream.chunk_size);
        assert_eq!(deserialized.training.seed, settings.training.seed);
    }
}
