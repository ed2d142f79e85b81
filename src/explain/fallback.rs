//! Deterministic narrative built from a score alone

use crate::types::score::{Recommendation, ScoreResult};

/// Four-section analysis derived only from the score fields and the amount.
///
/// Used whenever the narrative generator is unconfigured or fails, so the same
/// input always produces the same text.
pub fn fallback_explanation(score: &ScoreResult, amount: f64) -> String {
    let detector = score.detector_label.as_str();
    let reconstruction = score.reconstruction_label.as_str();
    let indicators = format!(
        "• Isolation Forest anomaly score: {:.1}% ({})\n\
         • Autoencoder reconstruction error: {:.4} ({})\n",
        score.detector_score * 100.0,
        detector,
        score.reconstruction_error,
        reconstruction,
    );
    let verdicts = format!(
        "• IF verdict: {} | AE verdict: {}\n",
        detector.to_uppercase(),
        reconstruction.to_uppercase()
    );

    if score.is_flagged() {
        let agreement = if score.models_agree() {
            "Both models agree on the verdict"
        } else {
            "Models disagree: one flags an anomaly while the other does not"
        };
        format!(
            "1. Risk Assessment\n\
             This transaction of ${:.2} has been flagged with {:.1}% combined confidence \
             as potentially fraudulent ({} risk).\n\n\
             2. Key Indicators\n\
             {}\
             • Transaction amount and feature patterns deviate significantly from baseline\n\n\
             3. Model Agreement\n\
             {}\
             • {}\n\n\
             4. Recommendation\n\
             {} - Immediate review required. Hold funds pending investigation.",
            amount,
            score.combined_confidence * 100.0,
            score.risk_level.as_str(),
            indicators,
            verdicts,
            agreement,
            score.recommendation.as_str(),
        )
    } else {
        let agreement = if score.models_agree() {
            "Both models indicate normal activity"
        } else {
            "Models disagree, but the combined score stays below the blocking bands"
        };
        let action = match score.recommendation {
            Recommendation::Review => "Hold for manual review before settlement.",
            _ => "Transaction may proceed.",
        };
        format!(
            "1. Risk Assessment\n\
             This transaction of ${:.2} appears within normal parameters with a {:.1}% \
             risk score ({} risk).\n\n\
             2. Key Indicators\n\
             {}\
             • Transaction patterns consistent with account history\n\n\
             3. Model Agreement\n\
             {}\
             • {}\n\n\
             4. Recommendation\n\
             {} - {}",
            amount,
            score.combined_confidence * 100.0,
            score.risk_level.as_str(),
            indicators,
            verdicts,
            agreement,
            score.recommendation.as_str(),
            action,
        )
    }
}
