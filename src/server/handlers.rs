use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use super::{ApiResult, AppState};
use crate::config::EngineKind;
use crate::conversation::TurnResult;
use crate::service::{AssistantReply, DocumentListing, StoredReport};
use crate::store::{SessionRecord, SessionSummary};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    pub transcript: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<TurnResult>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let result = state.service.create(request.engine, request.language).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionRecord>> {
    Ok(Json(state.service.get(&id).await?))
}

pub async fn submit_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TurnRequest>,
) -> ApiResult<Json<TurnResult>> {
    Ok(Json(state.service.submit(&id, &request.text).await?))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TurnResult>> {
    Ok(Json(state.service.stop(&id).await?))
}

pub async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TurnResult>> {
    Ok(Json(state.service.restart(&id).await?))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StoredReport>> {
    Ok(Json(state.service.report(&id).await?))
}

pub async fn regenerate_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TurnResult>> {
    Ok(Json(state.service.regenerate(&id).await?))
}

pub async fn history(State(state): State<AppState>) -> ApiResult<Json<Vec<SessionSummary>>> {
    Ok(Json(state.service.history().await?))
}

pub async fn list_reports(State(state): State<AppState>) -> ApiResult<Json<Vec<DocumentListing>>> {
    Ok(Json(state.service.documents().await?))
}

pub async fn download_report(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.service.document(&filename).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&filename))], bytes))
}

pub async fn assistant(
    State(state): State<AppState>,
    Json(request): Json<AssistantRequest>,
) -> ApiResult<Json<AssistantReply>> {
    let reply = state
        .service
        .assistant(&request.transcript, request.session_id.as_deref())
        .await?;
    Ok(Json(reply))
}

fn content_type(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "json" => "application/json",
        Some(ext) if ext == "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::llm::testing::{ScriptedGateway, triage_json};
    use crate::server::router;
    use crate::service::testing::service;

    async fn app(dir: &std::path::Path, gateway: ScriptedGateway) -> axum::Router {
        let (_store, svc) = service(dir, gateway).await;
        router(AppState {
            service: Arc::new(svc),
        })
    }

    async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.PDF"), "application/pdf");
        assert_eq!(content_type("a.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), ScriptedGateway::unreachable()).await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_session_flow_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), ScriptedGateway::unreachable()).await;

        let (status, created) = send(&app, "POST", "/api/sessions", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["stage"], "ask_disease");
        let id = created["sessionId"].as_str().unwrap().to_string();

        let (status, turn) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/turns"),
            Some(json!({ "text": "fever" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(turn["stage"], "ask_language");

        let (status, record) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["conversation"]["patient"]["disease"], "fever");

        let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}/report"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, history) = send(&app, "GET", "/api/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (status, stopped) = send(&app, "POST", &format!("/api/sessions/{id}/stop"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stopped["stage"], "idle");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/turns"),
            Some(json!({ "text": "english" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_state");
    }

    #[tokio::test]
    async fn test_empty_turn_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), ScriptedGateway::unreachable()).await;
        let (_, created) = send(&app, "POST", "/api/sessions", None).await;
        let id = created["sessionId"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/turns"),
            Some(json!({ "text": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "empty_input");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), ScriptedGateway::unreachable()).await;
        let (status, _) = send(&app, "GET", "/api/sessions/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_schema_violation_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ScriptedGateway::new(vec![Ok("{\"unexpected\":true}".to_string())]);
        let app = app(dir.path(), gateway).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/assistant",
            Some(json!({ "transcript": "sore throat" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "schema_violation");
        assert_eq!(body["raw"], "{\"unexpected\":true}");
    }

    #[tokio::test]
    async fn test_assistant_document_download() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = ScriptedGateway::new(vec![Ok(triage_json("Rest well.", "Naproxen"))]);
        let app = app(dir.path(), gateway).await;

        let (status, reply) = send(
            &app,
            "POST",
            "/api/assistant",
            Some(json!({ "transcript": "back pain since monday" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["replyText"], "Rest well.");
        assert_eq!(reply["fallback"], false);
        let url = reply["document"]["url"].as_str().unwrap().to_string();

        let (status, listing) = send(&app, "GET", "/api/reports", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing[0]["url"], url);

        let response = app
            .clone()
            .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("Naproxen"));

        let (status, _) = send(&app, "GET", "/reports/..secret", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
