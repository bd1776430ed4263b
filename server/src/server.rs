use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tool_broker::{Broker, BrokerStats, EnvironmentReport, VirtualTool};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::Result;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// `POST /call` 请求体
#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub result: Value,
}

pub fn create_app(broker: Arc<Broker>) -> Router {
    let state = AppState { broker };

    Router::new()
        .route("/call", post(call_handler))
        .route("/stats", get(stats_handler))
        .route("/diagnose", get(diagnose_handler))
        .route("/catalog", get(catalog_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn call_handler(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Result<Json<CallResponse>> {
    debug!(server = %request.server, tool = %request.tool, "HTTP call");
    let args = if request.args.is_null() {
        json!({})
    } else {
        request.args
    };

    let result = state
        .broker
        .call(&request.server, &request.tool, args)
        .await?;
    Ok(Json(CallResponse { result }))
}

async fn stats_handler(State(state): State<AppState>) -> Json<BrokerStats> {
    Json(state.broker.stats().await)
}

async fn diagnose_handler(State(state): State<AppState>) -> Json<EnvironmentReport> {
    Json(state.broker.diagnose_environment())
}

async fn catalog_handler(State(state): State<AppState>) -> Json<Vec<VirtualTool>> {
    Json(state.broker.virtual_catalog())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
