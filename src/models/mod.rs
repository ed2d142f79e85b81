//! Anomaly models and the score combiner

pub mod combiner;
pub mod detector;
pub mod inference;
pub mod loader;

pub use combiner::ScoreCombiner;
pub use detector::{AnomalyDetector, DetectorOutput, ReconstructionModel};
pub use inference::{OnnxAnomalyDetector, OnnxAutoencoder};
pub use loader::{AutoencoderMeta, ModelLoader};
