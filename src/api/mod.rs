//! HTTP and WebSocket surface

pub mod handlers;
pub mod ws;

use crate::error::ServiceError;
use crate::service::ServiceContext;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared application state
pub type AppState = Arc<ServiceContext>;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::ModelsNotReady | ServiceError::DatasetNotLoaded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::UpstreamGeneration(msg) => {
                tracing::error!("Upstream generation error: {}", msg);
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Inference(msg) => {
                tracing::error!("Inference error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/stats/live", get(handlers::live_stats))
        .route("/api/transactions", get(handlers::transactions))
        .route("/api/predict/:id", get(handlers::predict))
        .route("/api/shap/:id", get(handlers::shap))
        .route("/api/explain/:id", get(handlers::explain))
        .route("/api/poll/transactions", get(handlers::poll_transactions))
        .route("/ws/transactions", get(ws::transactions))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{context_without_data, context_without_models, ready_context};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn ready_app() -> Router {
        create_router(Arc::new(ready_context()))
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(ready_app(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["models_loaded"], true);
        assert_eq!(body["data_loaded"], true);
        assert!(body["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(body["feed"]["cursor"], 0);
        assert_eq!(body["feed"]["cycle"], 0);
        assert_eq!(body["feed"]["pool_len"], 6);
        assert_eq!(body["feed"]["buffer_capacity"], 100);

        let app = create_router(Arc::new(context_without_models()));
        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models_loaded"], false);
        assert!(body["feed"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_id_is_json_bad_request() {
        for uri in ["/api/predict/abc", "/api/shap/1.5", "/api/explain/x"] {
            let (status, body) = get_json(ready_app(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["status"], 400);
            assert!(body["error"].as_str().unwrap().contains("invalid transaction id"));
        }
    }

    #[tokio::test]
    async fn test_error_body() {
        let app = create_router(Arc::new(context_without_data()));
        let (status, body) = get_json(app, "/api/stats").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], 503);
        assert_eq!(body["error"], "Dataset is not loaded");
    }

    #[tokio::test]
    async fn test_cached_stats() {
        let (status, body) = get_json(ready_app(), "/api/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_transactions"], 4);
        assert_eq!(body["flagged_transactions"], 1);
        assert_eq!(body["model_accuracy"], 1.0);
        assert_eq!(body["blocked_amount"], 900.0);
        assert_eq!(body["risk_distribution"]["CRITICAL"], 1);
        assert_eq!(body["risk_distribution"]["LOW"], 3);
    }

    #[tokio::test]
    async fn test_live_stats_before_any_step() {
        let (status, body) = get_json(ready_app(), "/api/stats/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        assert_eq!(body["accuracy"], 0.0);

        let app = create_router(Arc::new(context_without_models()));
        let (status, _) = get_json(app, "/api/stats/live").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_transactions_page() {
        let (status, body) = get_json(ready_app(), "/api/transactions?page=2&limit=3").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 2);
        assert_eq!(body["limit"], 3);
        assert_eq!(body["total"], 4);
        let rows = body["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], 3);
        assert_eq!(rows[0]["amount"], 7.25);
        assert_eq!(rows[0]["risk_level"], "LOW");
    }

    #[tokio::test]
    async fn test_transactions_limit_validation() {
        let (status, body) = get_json(ready_app(), "/api/transactions?limit=101").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let (status, _) = get_json(ready_app(), "/api/transactions?page=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict() {
        let (status, body) = get_json(ready_app(), "/api/predict/2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction_id"], 2);
        assert_eq!(body["amount"], 900.0);
        assert_eq!(body["risk_level"], "CRITICAL");
        assert_eq!(body["recommendation"], "BLOCK");
        assert!(body["if_label"].is_string());
        assert!(body["ae_reconstruction_error"].is_number());
    }

    #[tokio::test]
    async fn test_predict_errors() {
        let (status, _) = get_json(ready_app(), "/api/predict/4").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get_json(ready_app(), "/api/predict/-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let app = create_router(Arc::new(context_without_models()));
        let (status, body) = get_json(app, "/api/predict/0").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Anomaly models are not loaded");
    }

    #[tokio::test]
    async fn test_shap() {
        let (status, body) = get_json(ready_app(), "/api/shap/2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction_id"], 2);
        let values = body["shap_values"].as_array().unwrap();
        assert_eq!(values.len(), 3);
        let magnitudes: Vec<f64> = values
            .iter()
            .map(|v| v["shap_value"].as_f64().unwrap().abs())
            .collect();
        assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_explain_streams_sse() {
        let response = ready_app()
            .oneshot(
                Request::builder()
                    .uri("/api/explain/2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        let events: Vec<&str> = body
            .split("\n\n")
            .filter(|e| !e.is_empty())
            .collect();

        assert_eq!(events.last(), Some(&"data: [DONE]"));
        let first: Value = serde_json::from_str(events[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(first["text"], "1. ");

        let text: String = events[..events.len() - 1]
            .iter()
            .map(|e| {
                let chunk: Value = serde_json::from_str(e.trim_start_matches("data: ")).unwrap();
                chunk["text"].as_str().unwrap().to_string()
            })
            .collect();
        assert!(text.contains("4. Recommendation"));
        assert!(text.contains("$900.00"));
    }

    #[tokio::test]
    async fn test_explain_unknown_id() {
        let (status, _) = get_json(ready_app(), "/api/explain/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_poll_triggers_step() {
        let app = ready_app();

        let (status, body) = get_json(app.clone(), "/api/poll/transactions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
        assert_eq!(body["transactions"][0]["id"], 0);
        assert_eq!(body["latest_id"], 0);

        let (_, body) = get_json(app.clone(), "/api/poll/transactions?since_id=0").await;
        let ids: Vec<u64> = body["transactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(body["latest_id"], 1);

        let (_, body) = get_json(app, "/api/stats/live").await;
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn test_poll_without_new_items_keeps_watermark() {
        let app = ready_app();
        let (_, body) = get_json(app, "/api/poll/transactions?since_id=50").await;

        assert!(body["transactions"].as_array().unwrap().is_empty());
        assert_eq!(body["latest_id"], 50);
    }

    #[tokio::test]
    async fn test_poll_limit_validation() {
        let (status, _) = get_json(ready_app(), "/api/poll/transactions?limit=51").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(ready_app(), "/api/poll/transactions?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let app = create_router(Arc::new(context_without_models()));
        let (status, _) = get_json(app, "/api/poll/transactions").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
