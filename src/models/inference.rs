//! ONNX Runtime implementations of the anomaly models

use crate::error::{Result, ServiceError};
use crate::models::detector::{AnomalyDetector, DetectorOutput, ReconstructionModel};
use crate::models::loader::{AutoencoderMeta, LoadedModel};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::debug;

/// skl2onnx marks anomalies with label -1
const ANOMALY_LABEL: i64 = -1;

fn ort_error(model: &str, err: ort::Error) -> ServiceError {
    ServiceError::inference(format!("{}: {}", model, err))
}

/// Input tensor of shape [1, num_features]
fn input_tensor(model: &str, features: &[f32]) -> Result<ort::value::Tensor<f32>> {
    let shape = vec![1_i64, features.len() as i64];
    ort::value::Tensor::from_array((shape, features.to_vec())).map_err(|e| ort_error(model, e))
}

/// Isolation forest exported with skl2onnx (`label` and `scores` outputs)
pub struct OnnxAnomalyDetector {
    model: Mutex<LoadedModel>,
    name: String,
    label_output: String,
    score_output: String,
}

impl OnnxAnomalyDetector {
    pub fn new(model: LoadedModel) -> anyhow::Result<Self> {
        let label_output = model
            .find_output("label")
            .ok_or_else(|| anyhow::anyhow!("{} has no label output", model.name))?
            .to_string();
        let score_output = model
            .find_output("score")
            .ok_or_else(|| anyhow::anyhow!("{} has no scores output", model.name))?
            .to_string();

        Ok(Self {
            name: model.name.clone(),
            model: Mutex::new(model),
            label_output,
            score_output,
        })
    }
}

impl AnomalyDetector for OnnxAnomalyDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, features: &[f32]) -> Result<DetectorOutput> {
        let start = Instant::now();
        let tensor = input_tensor(&self.name, features)?;

        let mut guard = self.model.lock();
        let model = &mut *guard;
        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => tensor])
            .map_err(|e| ort_error(&self.name, e))?;

        let label = outputs
            .get(self.label_output.as_str())
            .ok_or_else(|| ServiceError::inference(format!("{}: missing label output", self.name)))?
            .try_extract_tensor::<i64>()
            .map_err(|e| ort_error(&self.name, e))?
            .1
            .first()
            .copied()
            .ok_or_else(|| ServiceError::inference(format!("{}: empty label output", self.name)))?;

        let decision = outputs
            .get(self.score_output.as_str())
            .ok_or_else(|| ServiceError::inference(format!("{}: missing scores output", self.name)))?
            .try_extract_tensor::<f32>()
            .map_err(|e| ort_error(&self.name, e))?
            .1
            .first()
            .copied()
            .ok_or_else(|| ServiceError::inference(format!("{}: empty scores output", self.name)))?;

        debug!(
            model = %self.name,
            decision = decision,
            label = label,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Detector inference complete"
        );

        Ok(DetectorOutput {
            decision: decision as f64,
            is_anomaly: label == ANOMALY_LABEL,
        })
    }
}

/// Autoencoder; the anomaly signal is the mean squared reconstruction error
pub struct OnnxAutoencoder {
    model: Mutex<LoadedModel>,
    name: String,
    meta: AutoencoderMeta,
}

impl OnnxAutoencoder {
    pub fn new(model: LoadedModel, meta: AutoencoderMeta) -> Self {
        Self {
            name: model.name.clone(),
            model: Mutex::new(model),
            meta,
        }
    }
}

/// Mean squared error over the overlapping prefix of both vectors
pub fn mean_squared_error(original: &[f32], reconstructed: &[f32]) -> f64 {
    let count = original.len().min(reconstructed.len());
    if count == 0 {
        return 0.0;
    }

    let sum: f64 = original
        .iter()
        .zip(reconstructed)
        .map(|(&o, &r)| ((o - r) as f64).powi(2))
        .sum();
    sum / count as f64
}

impl ReconstructionModel for OnnxAutoencoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn reconstruction_error(&self, features: &[f32]) -> Result<f64> {
        if features.len() != self.meta.input_dim {
            return Err(ServiceError::inference(format!(
                "{} expects {} features, got {}",
                self.name,
                self.meta.input_dim,
                features.len()
            )));
        }

        let tensor = input_tensor(&self.name, features)?;

        let mut guard = self.model.lock();
        let model = &mut *guard;
        let output_name = model.output_names[0].clone();
        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => tensor])
            .map_err(|e| ort_error(&self.name, e))?;

        let (_, reconstructed) = outputs
            .get(output_name.as_str())
            .ok_or_else(|| ServiceError::inference(format!("{}: missing output", self.name)))?
            .try_extract_tensor::<f32>()
            .map_err(|e| ort_error(&self.name, e))?;

        Ok(mean_squared_error(features, reconstructed))
    }

    fn threshold(&self) -> f64 {
        self.meta.threshold
    }
}
