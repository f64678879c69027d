//! HTTP surface over the scoring service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::csv_reader::TransactionBatch;
use crate::error::{AppError, AppResult};
use crate::scoring::{Decision, ScoringService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScoringService>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    threshold: f64,
    features: usize,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub fraud_probability: f64,
    pub decision: Decision,
}

pub fn create_router(service: Arc<ScoringService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        threshold: state.service.threshold(),
        features: state.service.schema().len(),
    })
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<PredictResponse>> {
    let Json(value) = payload.map_err(|rejection| AppError::ValidationError(rejection.body_text()))?;
    if !value.is_object() {
        return Err(AppError::ValidationError(
            "expected a single transaction object".to_string(),
        ));
    }
    let batch = TransactionBatch::from_json_value(value)?;

    let predictions = state.service.score_batch(&batch)?;
    let prediction = predictions.into_iter().next().ok_or_else(|| {
        AppError::ValidationError("timestamp could not be parsed".to_string())
    })?;
    if !prediction.fraud_probability.is_finite() {
        return Err(AppError::InternalError(format!(
            "classifier returned {} for sender {}",
            prediction.fraud_probability, prediction.sender_id
        )));
    }

    tracing::debug!(
        sender = %prediction.sender_id,
        probability = prediction.fraud_probability,
        decision = ?prediction.decision,
        "scored transaction"
    );
    Ok(Json(PredictResponse {
        fraud_probability: prediction.fraud_probability,
        decision: prediction.decision,
    }))
}

pub async fn run(service: Arc<ScoringService>, addr: SocketAddr) -> std::io::Result<()> {
    let app = create_router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("scoring service listening on http://{}", addr);
    axum::serve(listener, app).await
}
