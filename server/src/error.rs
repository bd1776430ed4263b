use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tool_broker::BrokerError;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 来自 broker 的错误
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
}

impl ApiError {
    /// HTTP 状态码与错误类别
    pub fn classify(&self) -> (StatusCode, &'static str) {
        let ApiError::Broker(err) = self;
        match err {
            BrokerError::UnknownServer { .. } => (StatusCode::NOT_FOUND, "unknown_server"),
            BrokerError::RequestTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "request_timeout"),
            BrokerError::WorkerCrashed { .. } => (StatusCode::BAD_GATEWAY, "worker_crashed"),
            BrokerError::Spawn { .. } => (StatusCode::BAD_GATEWAY, "spawn_failed"),
            BrokerError::Handshake { .. } => (StatusCode::BAD_GATEWAY, "handshake_failed"),
            BrokerError::Rpc { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "tool_error"),
            BrokerError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
            BrokerError::Config(_) | BrokerError::Io(_) | BrokerError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        let ApiError::Broker(err) = &self;
        let code = match err {
            BrokerError::Rpc { code, .. } => Some(*code),
            _ => None,
        };

        warn!(status = status.as_u16(), kind, "Request failed: {}", err);

        let body = ErrorBody {
            error: kind,
            message: err.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
