//! Natural-language analysis of a scored transaction, streamed as text chunks.
//!
//! The generator output is relayed unmodified. When it cannot start, or fails
//! part way, the stream switches to the rule-based analysis so callers always
//! receive a complete text.

use crate::config::NarrativeConfig;
use crate::error::{Result, ServiceError};
use crate::explain::attribution::{Attribution, AttributionReport};
use crate::explain::fallback::fallback_explanation;
use crate::types::score::ScoreResult;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attributions forwarded to the generator
pub const PROMPT_ATTRIBUTIONS: usize = 5;

pub type TextStream = BoxStream<'static, Result<String>>;

pub const SYSTEM_PROMPT: &str = "You are FraudPulse AI, a fraud analyst embedded in a real-time \
transaction monitoring dashboard. You explain verdicts produced by two models, an Isolation \
Forest anomaly detector and an autoencoder scored by reconstruction error, together with \
per-feature attribution values.

Write exactly these four sections, in order, and always finish all four:

1. Risk Assessment
One or two sentences with the overall verdict and the main reason.

2. Key Indicators
For each listed feature, say what its value means and whether its attribution pushes toward \
fraud or toward a legitimate verdict. Quote the feature names and attribution values.

3. Model Agreement
Compare the Isolation Forest score with the reconstruction error and explain any disagreement.

4. Recommendation
State BLOCK, REVIEW or ALLOW and justify it from the combined evidence.

Rules: quote the actual numbers, use bullet points (•) for lists, no markdown headers or bold \
text, 200 to 300 words.";

/// Everything the generator is told about one transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeRequest {
    pub transaction_id: usize,
    pub amount: f64,
    pub score: ScoreResult,
    /// Highest-ranked attributions; empty when the provider is unavailable
    pub attributions: Vec<Attribution>,
}

impl NarrativeRequest {
    pub fn new(
        transaction_id: usize,
        amount: f64,
        score: ScoreResult,
        report: &AttributionReport,
    ) -> Self {
        Self {
            transaction_id,
            amount,
            score,
            attributions: report.top(PROMPT_ATTRIBUTIONS).to_vec(),
        }
    }

    pub fn fallback_text(&self) -> String {
        fallback_explanation(&self.score, self.amount)
    }
}

pub fn build_prompt(request: &NarrativeRequest) -> String {
    let score = &request.score;
    let attributions = if request.attributions.is_empty() {
        "  • none available".to_string()
    } else {
        request
            .attributions
            .iter()
            .map(|a| {
                let direction = if a.shap_value < 0.0 {
                    "pushes toward FRAUD"
                } else {
                    "pushes toward LEGIT"
                };
                format!(
                    "  • {}: value={:.4}, SHAP impact={:+.6} ({})",
                    a.feature, a.value, a.shap_value, direction
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Analyze this credit card transaction for fraud. Provide a COMPLETE analysis with all 4 sections.\n\
         \n\
         Transaction ID: {}\n\
         Amount: ${:.2}\n\
         \n\
         Model Results:\n\
         \x20 • Isolation Forest anomaly score: {:.2}% → verdict: {}\n\
         \x20 • Autoencoder reconstruction error: {:.6} → verdict: {}\n\
         \x20 • Combined confidence: {:.2}%\n\
         \x20 • Final risk level: {}\n\
         \x20 • Recommendation: {}\n\
         \n\
         Top {} SHAP feature contributions (negative = pushes toward fraud, positive = pushes toward legit):\n\
         {}\n\
         \n\
         Provide your complete fraud analysis now, with all 4 sections \
         (Risk Assessment, Key Indicators, Model Agreement, Recommendation):",
        request.transaction_id,
        request.amount,
        score.detector_score * 100.0,
        score.detector_label.as_str().to_uppercase(),
        score.reconstruction_error,
        score.reconstruction_label.as_str().to_uppercase(),
        score.combined_confidence * 100.0,
        score.risk_level.as_str(),
        score.recommendation.as_str(),
        PROMPT_ATTRIBUTIONS,
        attributions,
    )
}

/// Source of narrative text
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Start a generation. Errors before the first chunk are returned here;
    /// later failures arrive as `Err` items in the stream.
    async fn generate(&self, request: &NarrativeRequest) -> Result<TextStream>;
}

/// Streams the rule-based analysis word by word
pub struct RuleBasedNarrator;

#[async_trait]
impl NarrativeGenerator for RuleBasedNarrator {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn generate(&self, request: &NarrativeRequest) -> Result<TextStream> {
        Ok(word_stream(request.fallback_text()).map(Ok).boxed())
    }
}

fn word_stream(text: String) -> BoxStream<'static, String> {
    let words: Vec<String> = text.split(' ').map(|word| format!("{} ", word)).collect();
    stream::iter(words).boxed()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateChunk {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

/// Splits a server-sent event byte stream into `data:` payloads
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of all complete `data:` lines
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Generative-language API client streaming `streamGenerateContent` over SSE
pub struct GeminiNarrator {
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
    max_output_tokens: u32,
    http_client: reqwest::Client,
}

impl GeminiNarrator {
    pub fn new(api_key: &str, config: &NarrativeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::upstream(format!("narrative client: {}", e)))?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            http_client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.endpoint, self.model, self.api_key
        )
    }
}

#[async_trait]
impl NarrativeGenerator for GeminiNarrator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &NarrativeRequest) -> Result<TextStream> {
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .http_client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::upstream(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::upstream(format!(
                "{} returned {}",
                self.model,
                response.status()
            )));
        }

        debug!(
            transaction_id = request.transaction_id,
            model = %self.model,
            "Narrative stream opened"
        );

        let mut decoder = SseDecoder::new();
        let chunks = response
            .bytes_stream()
            .map(move |bytes| match bytes {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .into_iter()
                    .filter(|payload| payload != "[DONE]")
                    .map(|payload| {
                        serde_json::from_str::<GenerateChunk>(&payload)
                            .map(|chunk| chunk.text())
                            .map_err(|e| ServiceError::upstream(format!("bad chunk: {}", e)))
                    })
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(ServiceError::upstream(e.without_url().to_string()))],
            })
            .flat_map(stream::iter)
            .filter(|chunk| futures::future::ready(!matches!(chunk, Ok(text) if text.is_empty())));

        Ok(chunks.boxed())
    }
}

fn unavailable_marker(error: &ServiceError) -> String {
    let reason = match error {
        ServiceError::UpstreamGeneration(msg) => msg.clone(),
        other => other.to_string(),
    };
    format!("[Analysis unavailable: {}] ", reason)
}

/// Relay the generator's text; on failure emit a marker followed by the
/// rule-based analysis and end the stream.
pub fn narrate_with_fallback(
    generator: Arc<dyn NarrativeGenerator>,
    request: NarrativeRequest,
) -> BoxStream<'static, String> {
    stream::once(async move {
        let fallback = request.fallback_text();
        match generator.generate(&request).await {
            Ok(chunks) => relay(chunks, fallback),
            Err(e) => {
                warn!(
                    transaction_id = request.transaction_id,
                    generator = generator.name(),
                    error = %e,
                    "Narrative generation failed, using rule-based analysis"
                );
                stream::iter(vec![unavailable_marker(&e), fallback]).boxed()
            }
        }
    })
    .flatten()
    .boxed()
}

fn relay(chunks: TextStream, fallback: String) -> BoxStream<'static, String> {
    stream::unfold(Some((chunks, fallback)), |state| async move {
        let (mut chunks, fallback) = state?;
        match chunks.next().await {
            Some(Ok(text)) => Some((vec![text], Some((chunks, fallback)))),
            Some(Err(e)) => {
                warn!(error = %e, "Narrative stream failed part way");
                Some((vec![unavailable_marker(&e), fallback], None))
            }
            None => None,
        }
    })
    .flat_map(stream::iter)
    .boxed()
}
