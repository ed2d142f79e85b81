//! Model seams: the two anomaly signals the combiner fuses

use crate::error::Result;

/// Raw output of the point-anomaly detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOutput {
    /// Decision function value; more negative = more anomalous
    pub decision: f64,
    /// Native binary verdict of the model
    pub is_anomaly: bool,
}

/// Point-anomaly detector (isolation forest)
pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, features: &[f32]) -> Result<DetectorOutput>;
}

/// Reconstruction-error detector (autoencoder)
pub trait ReconstructionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Non-negative error between the input and its reconstruction
    fn reconstruction_error(&self, features: &[f32]) -> Result<f64>;

    /// Calibration threshold computed offline; errors above it are anomalous
    fn threshold(&self) -> f64;
}
