//! ONNX model loader

use crate::config::ModelsConfig;
use crate::models::inference::{OnnxAnomalyDetector, OnnxAutoencoder};
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Loaded ONNX model with metadata
pub struct LoadedModel {
    /// Model name
    pub name: String,
    /// ONNX Runtime session
    pub session: Session,
    /// Input name for the model
    pub input_name: String,
    /// Output names in declaration order
    pub output_names: Vec<String>,
}

impl LoadedModel {
    /// First output whose name contains `needle`
    pub fn find_output(&self, needle: &str) -> Option<&str> {
        self.output_names
            .iter()
            .find(|name| name.contains(needle))
            .map(String::as_str)
    }
}

/// Calibration data written next to the autoencoder export
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutoencoderMeta {
    pub threshold: f64,
    pub input_dim: usize,
}

impl AutoencoderMeta {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read autoencoder metadata {}", path.display()))?;
        let meta: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid autoencoder metadata {}", path.display()))?;

        if !(meta.threshold.is_finite() && meta.threshold > 0.0) {
            anyhow::bail!("Autoencoder threshold must be positive, got {}", meta.threshold);
        }
        Ok(meta)
    }
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        // Initialize ONNX Runtime
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load a single ONNX model from file
    pub fn load_model<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<LoadedModel> {
        let path = path.as_ref();

        info!(model = %name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            anyhow::bail!("Model {} declares no outputs", name);
        }

        info!(
            model = %name,
            input = %input_name,
            outputs = ?output_names,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            name: name.to_string(),
            session,
            input_name,
            output_names,
        })
    }

    /// Load the isolation forest export
    pub fn load_detector(&self, config: &ModelsConfig) -> Result<OnnxAnomalyDetector> {
        let model = self.load_model(config.detector_path(), "isolation_forest")?;
        OnnxAnomalyDetector::new(model)
    }

    /// Load the autoencoder export and its calibration metadata
    pub fn load_autoencoder(&self, config: &ModelsConfig) -> Result<OnnxAutoencoder> {
        let meta = AutoencoderMeta::load(config.autoencoder_meta_path())?;
        let model = self.load_model(config.autoencoder_path(), "autoencoder")?;

        info!(
            threshold = meta.threshold,
            input_dim = meta.input_dim,
            "Autoencoder calibration loaded"
        );
        Ok(OnnxAutoencoder::new(model, meta))
    }
}
