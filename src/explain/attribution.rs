//! Per-feature attributions from an external explainability provider

use crate::error::{Result, ServiceError};
use crate::types::score::round_to;
use crate::types::transaction::FeaturePack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Contribution of one feature to the detector output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub feature: String,
    pub value: f64,
    pub shap_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub base_value: f64,
    pub prediction: f64,
    /// Ranked by absolute contribution, largest first
    pub shap_values: Vec<Attribution>,
}

impl AttributionReport {
    /// Pair raw contributions with feature names and values, then rank.
    ///
    /// Extra contributions beyond the feature width are ignored.
    pub fn from_contributions(
        base_value: f64,
        features: &FeaturePack,
        names: &[String],
        contributions: &[f64],
    ) -> Self {
        let mut shap_values: Vec<Attribution> = names
            .iter()
            .zip(features.values())
            .zip(contributions)
            .map(|((name, &value), &contribution)| Attribution {
                feature: name.clone(),
                value: round_to(value as f64, 4),
                shap_value: round_to(contribution, 6),
            })
            .collect();

        shap_values.sort_by(|a, b| b.shap_value.abs().total_cmp(&a.shap_value.abs()));

        let total: f64 = shap_values.iter().map(|a| a.shap_value).sum();
        Self {
            base_value: round_to(base_value, 6),
            prediction: round_to(base_value + total, 6),
            shap_values,
        }
    }

    pub fn top(&self, n: usize) -> &[Attribution] {
        &self.shap_values[..n.min(self.shap_values.len())]
    }
}

/// Explainability provider
#[async_trait]
pub trait Explainer: Send + Sync {
    fn name(&self) -> &str;

    async fn explain(&self, features: &FeaturePack, names: &[String]) -> Result<AttributionReport>;
}

#[derive(Debug, Serialize)]
struct ExplainRequest<'a> {
    features: &'a [f32],
    feature_names: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ExplainResponse {
    base_value: f64,
    values: Vec<f64>,
}

/// Posts feature vectors to an attribution sidecar over HTTP
pub struct HttpExplainer {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpExplainer {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::upstream(format!("explainer client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    fn name(&self) -> &str {
        "http"
    }

    async fn explain(&self, features: &FeaturePack, names: &[String]) -> Result<AttributionReport> {
        let request = ExplainRequest {
            features: features.values(),
            feature_names: names,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::upstream(format!(
                "explainer returned {}",
                response.status()
            )));
        }

        let body: ExplainResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::upstream(e.to_string()))?;

        if body.values.len() < features.dim() {
            return Err(ServiceError::upstream(format!(
                "explainer returned {} values for {} features",
                body.values.len(),
                features.dim()
            )));
        }

        debug!(endpoint = %self.endpoint, features = features.dim(), "Attributions received");

        Ok(AttributionReport::from_contributions(
            body.base_value,
            features,
            names,
            &body.values,
        ))
    }
}
