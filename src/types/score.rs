//! Scoring verdicts produced by the score combiner

use serde::{Deserialize, Serialize};

/// Lower bound of the CRITICAL band
pub const CRITICAL_THRESHOLD: f64 = 0.85;
/// Lower bound of the HIGH band
pub const HIGH_THRESHOLD: f64 = 0.60;
/// Lower bound of the MEDIUM band
pub const MEDIUM_THRESHOLD: f64 = 0.35;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Band a combined confidence. Boundaries belong to the higher band.
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            RiskLevel::Critical
        } else if score >= HIGH_THRESHOLD {
            RiskLevel::High
        } else if score >= MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn recommendation(self) -> Recommendation {
        match self {
            RiskLevel::Critical | RiskLevel::High => Recommendation::Block,
            RiskLevel::Medium => Recommendation::Review,
            RiskLevel::Low => Recommendation::Allow,
        }
    }

    /// HIGH and CRITICAL count as a fraud prediction
    pub fn is_flagged(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Allow,
    Review,
    Block,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Allow => "ALLOW",
            Recommendation::Review => "REVIEW",
            Recommendation::Block => "BLOCK",
        }
    }
}

/// Per-model binary verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Fraud,
    Legitimate,
}

impl Verdict {
    pub fn from_flag(is_fraud: bool) -> Self {
        if is_fraud {
            Verdict::Fraud
        } else {
            Verdict::Legitimate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Fraud => "fraud",
            Verdict::Legitimate => "legitimate",
        }
    }
}

/// Fused verdict for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Normalized isolation-forest score (0.0 - 1.0)
    #[serde(rename = "if_score")]
    pub detector_score: f64,
    #[serde(rename = "if_label")]
    pub detector_label: Verdict,
    /// Raw autoencoder reconstruction error
    #[serde(rename = "ae_reconstruction_error")]
    pub reconstruction_error: f64,
    #[serde(rename = "ae_label")]
    pub reconstruction_label: Verdict,
    pub combined_confidence: f64,
    pub risk_level: RiskLevel,
    pub recommendation: Recommendation,
}

impl ScoreResult {
    pub fn is_flagged(&self) -> bool {
        self.risk_level.is_flagged()
    }

    pub fn models_agree(&self) -> bool {
        self.detector_label == self.reconstruction_label
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.75), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.95), RiskLevel::Critical);
    }

    #[test]
    fn test_band_boundaries_are_inclusive_upward() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3499), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.35), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.5999), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8499), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.85), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_bands_are_monotonic_over_unit_interval() {
        let mut previous = RiskLevel::Low;
        for step in 0..=10_000 {
            let score = step as f64 / 10_000.0;
            let level = RiskLevel::from_score(score);
            assert!(level >= previous, "band decreased at {}", score);
            previous = level;
        }
        assert_eq!(previous, RiskLevel::Critical);
    }

    #[test]
    fn test_recommendation_follows_level() {
        assert_eq!(RiskLevel::Critical.recommendation(), Recommendation::Block);
        assert_eq!(RiskLevel::High.recommendation(), Recommendation::Block);
        assert_eq!(RiskLevel::Medium.recommendation(), Recommendation::Review);
        assert_eq!(RiskLevel::Low.recommendation(), Recommendation::Allow);
    }

    #[test]
    fn test_score_result_wire_names() {
        let result = ScoreResult {
            detector_score: 0.6,
            detector_label: Verdict::Fraud,
            reconstruction_error: 0.0123,
            reconstruction_label: Verdict::Legitimate,
            combined_confidence: 0.7,
            risk_level: RiskLevel::High,
            recommendation: Recommendation::Block,
        };

        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["if_score"], 0.6);
        assert_eq!(json["if_label"], "fraud");
        assert_eq!(json["ae_label"], "legitimate");
        assert_eq!(json["risk_level"], "HIGH");
        assert_eq!(json["recommendation"], "BLOCK");
        assert!(!result.models_agree());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(0.5, 0), 1.0);
        assert_eq!(round_to(2.0 / 3.0, 2), 0.67);
    }
}
