//! Running statistics over the current feed cycle

use crate::types::score::{round_to, Recommendation, ScoreResult};
use serde::{Deserialize, Serialize};

/// Aggregates for the items delivered since the last cycle reset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveStats {
    total: u64,
    flagged: u64,
    blocked_amount: f64,
    correct: u64,
    risk_sum: f64,
}

impl LiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one scored transaction into the aggregates
    pub fn record(&mut self, score: &ScoreResult, amount: f64, ground_truth: u8) {
        self.total += 1;
        self.risk_sum += score.combined_confidence;

        let flagged = score.is_flagged();
        if flagged {
            self.flagged += 1;
        }
        if score.recommendation == Recommendation::Block {
            self.blocked_amount += amount.abs();
        }
        if flagged == (ground_truth == 1) {
            self.correct += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn snapshot(&self) -> LiveStatsSnapshot {
        if self.total == 0 {
            return LiveStatsSnapshot::default();
        }

        let total = self.total as f64;
        LiveStatsSnapshot {
            total: self.total,
            flagged: self.flagged,
            blocked_amount: round_to(self.blocked_amount, 2),
            correct: self.correct,
            risk_sum: round_to(self.risk_sum, 4),
            accuracy: round_to(self.correct as f64 / total, 4),
            avg_risk_score: round_to(self.risk_sum / total, 4),
            flag_rate: round_to(self.flagged as f64 / total, 4),
        }
    }
}

/// Point-in-time copy of [`LiveStats`] with derived ratios
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStatsSnapshot {
    pub total: u64,
    pub flagged: u64,
    pub blocked_amount: f64,
    pub correct: u64,
    pub risk_sum: f64,
    pub accuracy: f64,
    pub avg_risk_score: f64,
    pub flag_rate: f64,
}
