//! Type definitions shared across the scoring core

pub mod score;
pub mod stream;
pub mod transaction;

pub use score::{Recommendation, RiskLevel, ScoreResult, Verdict};
pub use stream::StreamItem;
pub use transaction::{FeaturePack, TransactionRecord};
