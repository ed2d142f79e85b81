//! Explainability collaborators: feature attributions and narrative text

pub mod attribution;
pub mod fallback;
pub mod narrative;

pub use attribution::{Attribution, AttributionReport, Explainer, HttpExplainer};
pub use fallback::fallback_explanation;
pub use narrative::{
    narrate_with_fallback, GeminiNarrator, NarrativeGenerator, NarrativeRequest, RuleBasedNarrator,
};
