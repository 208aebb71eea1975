//! Administrative HTTP surface.
//!
//! # Routes
//!
//! - `GET /health` - Health check
//! - `GET /v1/server` - Server status
//! - `PUT /v1/server/status` - Enable, disable or stop the server

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use provisioner_core::ServerAction;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ControlError;
use crate::service::{ServerControl, ServerInfo};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the admin router for `control`.
pub fn router<C: ServerControl + 'static>(control: Arc<C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/server", get(server_info::<C>))
        .route("/v1/server/status", put(update_status::<C>))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

async fn health() -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}

async fn server_info<C: ServerControl>(State(control): State<Arc<C>>) -> Json<ServerInfo> {
    Json(control.info())
}

/// Body of a status update.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// One of `enable`, `disable` or `stop`.
    pub action: String,
}

/// Reply to an accepted status update.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// What the server did.
    pub message: String,
    /// Server state after the action.
    pub status: &'static str,
}

async fn update_status<C: ServerControl>(
    State(control): State<Arc<C>>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let action = ServerAction::from_str(&request.action).map_err(ControlError::from)?;

    let message = control.update_status(action)?;
    tracing::info!(action = %action, message = %message, "Processed admin action");

    Ok(Json(StatusResponse {
        message,
        status: control.info().status,
    }))
}

/// Admin API error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request cannot be honoured.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::InvalidRequest(msg) => Self::BadRequest(msg),
            ControlError::Core(e) => Self::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "Admin request failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use parking_lot::Mutex;
    use provisioner_core::ServiceState;
    use tower::ServiceExt;

    use super::*;
    use crate::error::Result;
    use crate::lifecycle;

    struct FakeControl {
        state: Mutex<ServiceState>,
        in_flight: usize,
    }

    impl FakeControl {
        fn new(state: ServiceState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                in_flight: 3,
            })
        }
    }

    impl ServerControl for FakeControl {
        fn info(&self) -> ServerInfo {
            let state = *self.state.lock();
            ServerInfo {
                product: "provisioner",
                description: "test",
                version: "0.0.0",
                status: state.as_str(),
                accepting_requests: lifecycle::accepts_requests(state),
                consumer_workers: 2,
                live_workers: 2,
                requests_in_progress: self.in_flight,
                template_count: 2,
                entity_type: None,
                config_file: Some("/etc/provisioner.yaml".to_string()),
                started_at: None,
            }
        }

        fn update_status(&self, action: ServerAction) -> Result<String> {
            let mut state = self.state.lock();
            let transition = lifecycle::transition(*state, action, self.in_flight)?;
            *state = transition.state;
            Ok(transition.message)
        }
    }

    async fn call(
        control: Arc<FakeControl>,
        method: Method,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(control).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (status, body) = call(
            FakeControl::new(ServiceState::Running),
            Method::GET,
            "/health",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn server_info_reports_state() {
        let (status, body) = call(
            FakeControl::new(ServiceState::Disabled),
            Method::GET,
            "/v1/server",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Disabled");
        assert_eq!(body["accepting_requests"], false);
        assert_eq!(body["requests_in_progress"], 3);
        assert_eq!(body["config_file"], "/etc/provisioner.yaml");
    }

    #[tokio::test]
    async fn stop_from_disabled_reports_in_flight() {
        let control = FakeControl::new(ServiceState::Disabled);
        let (status, body) = call(
            Arc::clone(&control),
            Method::PUT,
            "/v1/server/status",
            r#"{"action":"stop"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            "Shutting down the server. The server will finish processing 3 requests."
        );
        assert_eq!(body["status"], "Shutting down");
        assert_eq!(*control.state.lock(), ServiceState::Stopping);
    }

    #[tokio::test]
    async fn illegal_action_is_bad_request() {
        let (status, body) = call(
            FakeControl::new(ServiceState::Running),
            Method::PUT,
            "/v1/server/status",
            r#"{"action":"stop"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn unknown_action_is_bad_request() {
        let (status, body) = call(
            FakeControl::new(ServiceState::Running),
            Method::PUT,
            "/v1/server/status",
            r#"{"action":"reboot"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (status, _) = call(
            FakeControl::new(ServiceState::Running),
            Method::PUT,
            "/v1/server/status",
            "not json",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stopped_server_is_internal_error() {
        let (status, body) = call(
            FakeControl::new(ServiceState::Stopped),
            Method::PUT,
            "/v1/server/status",
            r#"{"action":"enable"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "internal_error");
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
