//! Configuration management for the fraud scoring service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub models: ModelsConfig,
    pub stream: StreamConfig,
    pub stats: StatsConfig,
    pub nats: NatsConfig,
    pub explainer: ExplainerConfig,
    pub narrative: NarrativeConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Dataset location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV with `Time,V1..V28,Amount,Class` columns
    pub dataset_path: String,
}

/// ONNX model artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing the exported models
    pub models_dir: String,
    /// Isolation forest export
    #[serde(default = "default_detector_file")]
    pub detector_file: String,
    /// Autoencoder export
    #[serde(default = "default_autoencoder_file")]
    pub autoencoder_file: String,
    /// JSON with the autoencoder calibration threshold and input width
    #[serde(default = "default_autoencoder_meta_file")]
    pub autoencoder_meta_file: String,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_detector_file() -> String {
    "isolation_forest.onnx".to_string()
}

fn default_autoencoder_file() -> String {
    "autoencoder.onnx".to_string()
}

fn default_autoencoder_meta_file() -> String {
    "autoencoder_meta.json".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

impl ModelsConfig {
    pub fn detector_path(&self) -> PathBuf {
        Path::new(&self.models_dir).join(&self.detector_file)
    }

    pub fn autoencoder_path(&self) -> PathBuf {
        Path::new(&self.models_dir).join(&self.autoencoder_file)
    }

    pub fn autoencoder_meta_path(&self) -> PathBuf {
        Path::new(&self.models_dir).join(&self.autoencoder_meta_file)
    }
}

/// Live feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Replay buffer capacity for pull clients
    pub buffer_capacity: usize,
    /// How many times each fraud row appears in the demo pool
    pub fraud_multiplier: usize,
    /// Optional cap on legitimate rows in the demo pool
    #[serde(default)]
    pub legit_cap: Option<usize>,
    /// Seed for pool sampling and shuffling
    pub seed: u64,
    /// Lower bound of the delay between feed steps
    pub min_delay_ms: u64,
    /// Upper bound of the delay between feed steps
    pub max_delay_ms: u64,
    /// Per-subscriber queue length on the push channel
    pub channel_capacity: usize,
    /// Interval of the periodic metrics summary (0 disables it)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    60
}

impl StreamConfig {
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        let min = self.min_delay_ms.min(self.max_delay_ms);
        let max = self.min_delay_ms.max(self.max_delay_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }
}

/// One-time dataset statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Rows scored for the cached snapshot
    pub sample_size: usize,
    pub seed: u64,
}

/// Optional NATS mirror of the live feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub enabled: bool,
    /// NATS server URL
    pub url: String,
    /// Subject that receives every stream item
    pub stream_subject: String,
}

/// Attribution sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainerConfig {
    /// Endpoint accepting `{ "features": [...] }`; attributions disabled when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

/// Narrative generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// API key; the rule-based narrative is used when unset
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the path in `FRAUDPULSE_CONFIG` or the default file
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("FRAUDPULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// Layers, lowest first: built-in defaults, the file (optional), then
    /// `FRAUDPULSE__SECTION__KEY` environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to encode default configuration")?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FRAUDPULSE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            data: DataConfig {
                dataset_path: "data/creditcard_sample.csv".to_string(),
            },
            models: ModelsConfig {
                models_dir: "models".to_string(),
                detector_file: default_detector_file(),
                autoencoder_file: default_autoencoder_file(),
                autoencoder_meta_file: default_autoencoder_meta_file(),
                onnx_threads: 1,
            },
            stream: StreamConfig {
                buffer_capacity: 100,
                fraud_multiplier: 3,
                legit_cap: Some(5000),
                seed: 42,
                min_delay_ms: 500,
                max_delay_ms: 2000,
                channel_capacity: 64,
                report_interval_secs: default_report_interval(),
            },
            stats: StatsConfig {
                sample_size: 200,
                seed: 42,
            },
            nats: NatsConfig {
                enabled: false,
                url: "nats://localhost:4222".to_string(),
                stream_subject: "fraudpulse.transactions".to_string(),
            },
            explainer: ExplainerConfig {
                endpoint: None,
                timeout_ms: 5000,
            },
            narrative: NarrativeConfig {
                api_key: None,
                model: "gemini-3-flash-preview".to_string(),
                endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                temperature: 0.4,
                max_output_tokens: 1500,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.stream.buffer_capacity, 100);
        assert_eq!(config.stream.fraud_multiplier, 3);
        assert_eq!(config.stream.seed, 42);
        assert_eq!(config.stats.sample_size, 200);
        assert!(!config.nats.enabled);
        assert!(config.narrative.api_key.is_none());
    }

    #[test]
    fn test_model_paths() {
        let config = AppConfig::default();
        assert_eq!(
            config.models.detector_path(),
            Path::new("models").join("isolation_forest.onnx")
        );
        assert_eq!(
            config.models.autoencoder_meta_path(),
            Path::new("models").join("autoencoder_meta.json")
        );
    }

    #[test]
    fn test_delay_bounds_are_ordered() {
        let mut config = AppConfig::default();
        config.stream.min_delay_ms = 3000;
        config.stream.max_delay_ms = 1000;

        let (min, max) = config.stream.delay_bounds();
        assert_eq!(min, Duration::from_millis(1000));
        assert_eq!(max, Duration::from_millis(3000));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[stream]\nbuffer_capacity = 25\nfraud_multiplier = 5\nseed = 7\nmin_delay_ms = 10\nmax_delay_ms = 20\nchannel_capacity = 8\n"
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.stream.buffer_capacity, 25);
        assert_eq!(config.stream.fraud_multiplier, 5);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.stream.buffer_capacity, 100);
    }
}
