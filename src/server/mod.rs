//! HTTP surface over [`IntakeService`].

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::IntakeError;
use crate::service::IntakeService;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IntakeService>,
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    /// Raw model output, on schema violations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Wrapper mapping [`IntakeError`] to an HTTP response
#[derive(Debug)]
pub struct ApiError(pub IntakeError);

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            IntakeError::EmptyInput => StatusCode::BAD_REQUEST,
            IntakeError::NotFound(_) => StatusCode::NOT_FOUND,
            IntakeError::SchemaViolation { .. } => StatusCode::BAD_GATEWAY,
            // Cancelled: a concurrent stop took the session first
            IntakeError::InvalidState(_) | IntakeError::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            IntakeError::EmptyInput => "empty_input",
            IntakeError::UpstreamUnreachable(_) => "upstream_unreachable",
            IntakeError::SchemaViolation { .. } => "schema_violation",
            IntakeError::Persistence(_) => "persistence_failure",
            IntakeError::Render(_) => "render_failure",
            IntakeError::NotFound(_) => "not_found",
            IntakeError::Cancelled => "cancelled",
            IntakeError::InvalidState(_) => "invalid_state",
            IntakeError::Io(_) | IntakeError::Serialization(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let raw = match &self.0 {
            IntakeError::SchemaViolation { raw, .. } => Some(raw.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.0.to_string(),
            raw,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/:id", get(handlers::get_session))
        .route("/api/sessions/:id/turns", post(handlers::submit_turn))
        .route("/api/sessions/:id/stop", post(handlers::stop_session))
        .route("/api/sessions/:id/restart", post(handlers::restart_session))
        .route(
            "/api/sessions/:id/report",
            get(handlers::get_report).post(handlers::regenerate_report),
        )
        .route("/api/history", get(handlers::history))
        .route("/api/reports", get(handlers::list_reports))
        .route("/api/assistant", post(handlers::assistant))
        .route("/reports/:filename", get(handlers::download_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Bind and serve until the process is stopped
pub async fn serve(service: Arc<IntakeService>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(AppState { service });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Intake server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
