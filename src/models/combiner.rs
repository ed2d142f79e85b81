//! Score combination for the two anomaly signals

use crate::error::{Result, ServiceError};
use crate::models::detector::{AnomalyDetector, ReconstructionModel};
use crate::types::score::{round_to, RiskLevel, ScoreResult, Verdict};
use crate::types::transaction::FeaturePack;
use std::sync::Arc;
use tracing::debug;

/// Weight of the isolation-forest score in the fused confidence
pub const DETECTOR_WEIGHT: f64 = 0.4;
/// Weight of the autoencoder score; it is the more precise of the two signals
pub const RECONSTRUCTION_WEIGHT: f64 = 0.6;

/// Map a decision function value to [0, 1], 1 = likely fraud
pub fn normalize_decision(decision: f64) -> f64 {
    (-decision * 2.0 + 0.5).clamp(0.0, 1.0)
}

/// Map a reconstruction error to [0, 1] relative to twice the calibration threshold
pub fn normalize_error(error: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return if error > 0.0 { 1.0 } else { 0.0 };
    }
    (error / (threshold * 2.0)).min(1.0)
}

/// Weighted fusion rounded to 4 decimals
pub fn fuse(detector_score: f64, reconstruction_score: f64) -> f64 {
    round_to(
        DETECTOR_WEIGHT * detector_score + RECONSTRUCTION_WEIGHT * reconstruction_score,
        4,
    )
}

/// Fuses the anomaly detector and the reconstruction model into one verdict.
///
/// Either model may be absent when its artifact failed to load; scoring then
/// fails with [`ServiceError::ModelsNotReady`].
#[derive(Clone, Default)]
pub struct ScoreCombiner {
    detector: Option<Arc<dyn AnomalyDetector>>,
    reconstructor: Option<Arc<dyn ReconstructionModel>>,
}

impl ScoreCombiner {
    pub fn new(
        detector: Arc<dyn AnomalyDetector>,
        reconstructor: Arc<dyn ReconstructionModel>,
    ) -> Self {
        Self {
            detector: Some(detector),
            reconstructor: Some(reconstructor),
        }
    }

    /// Combiner with no models loaded
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_some() && self.reconstructor.is_some()
    }

    /// Names of the loaded models
    pub fn model_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(detector) = &self.detector {
            names.push(detector.name().to_string());
        }
        if let Some(reconstructor) = &self.reconstructor {
            names.push(reconstructor.name().to_string());
        }
        names
    }

    pub fn score(&self, features: &FeaturePack) -> Result<ScoreResult> {
        let (detector, reconstructor) = match (&self.detector, &self.reconstructor) {
            (Some(d), Some(r)) => (d, r),
            _ => return Err(ServiceError::ModelsNotReady),
        };

        let output = detector.detect(features.values())?;
        if !output.decision.is_finite() {
            return Err(ServiceError::inference(format!(
                "{} returned a non-finite decision score",
                detector.name()
            )));
        }
        let detector_score = normalize_decision(output.decision);

        let error = reconstructor.reconstruction_error(features.values())?;
        if !error.is_finite() || error < 0.0 {
            return Err(ServiceError::inference(format!(
                "{} returned an invalid reconstruction error {}",
                reconstructor.name(),
                error
            )));
        }
        let threshold = reconstructor.threshold();
        let reconstruction_score = normalize_error(error, threshold);

        let combined_confidence = fuse(detector_score, reconstruction_score);
        let risk_level = RiskLevel::from_score(combined_confidence);

        debug!(
            detector_score = detector_score,
            reconstruction_error = error,
            combined_confidence = combined_confidence,
            risk_level = ?risk_level,
            "Transaction scored"
        );

        Ok(ScoreResult {
            detector_score: round_to(detector_score, 4),
            detector_label: Verdict::from_flag(output.is_anomaly),
            reconstruction_error: round_to(error, 6),
            reconstruction_label: Verdict::from_flag(error > threshold),
            combined_confidence,
            risk_level,
            recommendation: risk_level.recommendation(),
        })
    }
}
