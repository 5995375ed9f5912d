// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Illustrative transport exercising the operations table end-to-end: no
// endpoint here is load-bearing for the core subsystems (L1-L7), which work
// identically when driven directly. CORS is configured permissively; tighten
// `allowed_origins` for a real deployment.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::errors::ServiceError;
use crate::types::Ric;
use crate::upstream::UpstreamFeed;

// =============================================================================
// Router construction
// =============================================================================

pub fn router<F: UpstreamFeed + 'static>(state: Arc<AppState<F>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/quotes", get(get_latest))
        .route("/api/v1/subscriptions", post(subscribe))
        .route("/api/v1/subscriptions", delete(unsubscribe))
        .route("/api/v1/subscriptions", get(subscribed))
        .route("/api/v1/stream", get(crate::api::stream::stream_handler))
        .route("/api/v1/quality/score", get(quality_score))
        .route("/api/v1/quality/issues", get(quality_issues))
        .route("/api/v1/quality/health", get(quality_health))
        .layer(cors)
        .with_state(state)
}

fn parse_rics(raw: &str) -> Result<Vec<Ric>, ServiceError> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| Ric::new(s).map_err(|_| ServiceError::InvalidArgument(format!("invalid ric: {s}"))))
        .collect()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// =============================================================================
// GetLatest
// =============================================================================

#[derive(Deserialize)]
struct RicListQuery {
    ric: String,
}

async fn get_latest<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<RicListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let rics = parse_rics(&query.ric)?;
    let quotes = state.get_latest(&rics);
    Ok(Json(quotes.into_values().collect::<Vec<_>>()))
}

// =============================================================================
// Subscribe / Unsubscribe / Subscribed
// =============================================================================

#[derive(Deserialize)]
struct SubscriptionRequest {
    rics: Vec<String>,
}

#[derive(Serialize)]
struct SubscriptionResponse {
    rics: Vec<String>,
}

#[derive(Serialize)]
struct SubscribeResponse {
    subscribed: Vec<String>,
    total_subscriptions: usize,
    backpressure: f64,
}

#[derive(Serialize)]
struct UnsubscribeResponse {
    unsubscribed: Vec<String>,
    remaining_subscriptions: usize,
}

async fn subscribe<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Json(body): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let rics = body
        .rics
        .iter()
        .map(|s| Ric::new(s).map_err(|_| ServiceError::InvalidArgument(format!("invalid ric: {s}"))))
        .collect::<Result<Vec<_>, _>>()?;
    let outcome = state.subscribe(&rics).await?;
    Ok(Json(SubscribeResponse {
        subscribed: outcome.subscribed.iter().map(|r| r.to_string()).collect(),
        total_subscriptions: outcome.total_subscriptions,
        backpressure: outcome.backpressure,
    }))
}

async fn unsubscribe<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Json(body): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let rics = body
        .rics
        .iter()
        .map(|s| Ric::new(s).map_err(|_| ServiceError::InvalidArgument(format!("invalid ric: {s}"))))
        .collect::<Result<Vec<_>, _>>()?;
    let outcome = state.unsubscribe(&rics).await;
    Ok(Json(UnsubscribeResponse {
        unsubscribed: outcome.unsubscribed.iter().map(|r| r.to_string()).collect(),
        remaining_subscriptions: outcome.remaining_subscriptions,
    }))
}

async fn subscribed<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
) -> impl IntoResponse {
    let rics: Vec<String> = state.subscribed().iter().map(|r| r.to_string()).collect();
    Json(SubscriptionResponse { rics })
}

// =============================================================================
// Quality endpoints
// =============================================================================

#[derive(Deserialize)]
struct RicQuery {
    ric: String,
}

#[derive(Serialize)]
struct QualityScoreResponse {
    score: f64,
    threshold: f64,
    healthy: bool,
}

async fn quality_score<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<RicQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let ric = Ric::new(&query.ric).map_err(|_| ServiceError::InvalidArgument("invalid ric".into()))?;
    let score = state.quality_score(&ric);
    let threshold = state.min_quality_score();
    Ok(Json(QualityScoreResponse {
        score,
        threshold,
        healthy: score >= threshold,
    }))
}

#[derive(Deserialize)]
struct QualityIssuesQuery {
    ric: String,
    #[serde(default = "default_hours")]
    hours: i64,
}

fn default_hours() -> i64 {
    24
}

async fn quality_issues<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<QualityIssuesQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let ric = Ric::new(&query.ric).map_err(|_| ServiceError::InvalidArgument("invalid ric".into()))?;
    let issues = state.quality_issues(&ric, query.hours);
    Ok(Json(issues))
}

async fn quality_health<F: UpstreamFeed + 'static>(
    State(state): State<Arc<AppState<F>>>,
) -> impl IntoResponse {
    if state.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({ "healthy": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "healthy": false })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rics_splits_on_comma_and_skips_empty() {
        let rics = parse_rics("IBM.N,AAPL.O,").unwrap();
        assert_eq!(rics.len(), 2);
        assert_eq!(rics[0].as_str(), "IBM.N");
    }

    #[test]
    fn parse_rics_rejects_nothing_for_empty_string() {
        let rics = parse_rics("").unwrap();
        assert!(rics.is_empty());
    }
}
