//! HTTP host surface
//!
//! Exposes the plugin lifecycle over JSON so the relay can run as a
//! standalone node. Each route maps onto one [`RelayPlugin`] call.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rtmprelay_core::{
    error::ErrorBody, ControlResponse, PluginInfo, RelayError, RelayPlugin, SessionHandle,
    SessionSnapshot,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub type SharedPlugin = Arc<dyn RelayPlugin>;

/// Relay error rendered as `{"error_code", "error"}` with a fitting status
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl AppError {
    fn from_body(body: ErrorBody) -> Self {
        Self {
            status: status_for_code(body.error_code),
            body,
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        if let RelayError::Internal(msg) = &err {
            error!("Internal relay error: {msg}");
        }
        Self::from_body(err.to_body())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type AppResult<T> = Result<T, AppError>;

/// HTTP status for a relay error code
const fn status_for_code(code: u16) -> StatusCode {
    match code {
        411..=415 => StatusCode::BAD_REQUEST,
        417 | 418 => StatusCode::CONFLICT,
        480 => StatusCode::SERVICE_UNAVAILABLE,
        481 => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(plugin: SharedPlugin) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(plugin_info))
        .route(
            "/sessions/{handle}",
            post(create_session).get(query_session).delete(destroy_session),
        )
        .route("/sessions/{handle}/message", post(handle_message))
        .route("/sessions/{handle}/media", post(setup_media).delete(hangup_media))
        .layer(TraceLayer::new_for_http())
        .with_state(plugin)
}

/// Serve the HTTP surface on `address` until `shutdown` resolves.
pub async fn serve(
    plugin: SharedPlugin,
    address: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(plugin))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn plugin_info(State(plugin): State<SharedPlugin>) -> Json<PluginInfo> {
    Json(plugin.info())
}

async fn create_session(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
) -> AppResult<impl IntoResponse> {
    let handle = SessionHandle::from(handle);
    plugin.create_session(handle.clone()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "session": handle }))))
}

async fn query_session(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
) -> AppResult<Json<SessionSnapshot>> {
    let snapshot = plugin.query_session(&SessionHandle::from(handle)).await?;
    Ok(Json(snapshot))
}

async fn destroy_session(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
) -> AppResult<StatusCode> {
    plugin.destroy_session(&SessionHandle::from(handle)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_message(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
    body: Bytes,
) -> AppResult<Json<ControlResponse>> {
    let message = if body.is_empty() {
        None
    } else {
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| RelayError::not_an_object(format!("JSON error: on line {}: {e}", e.line())))?;
        Some(value)
    };

    match plugin
        .handle_message(&SessionHandle::from(handle), message.as_ref())
        .await
    {
        ControlResponse::Error(body) => Err(AppError::from_body(body)),
        response => Ok(Json(response)),
    }
}

async fn setup_media(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
) -> AppResult<StatusCode> {
    plugin.setup_media(&SessionHandle::from(handle)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn hangup_media(
    State(plugin): State<SharedPlugin>,
    Path(handle): Path<String>,
) -> AppResult<StatusCode> {
    plugin.hangup_media(&SessionHandle::from(handle)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use rtmprelay_core::{test_helpers::MockEngine, Config, RtmpRelay};
    use tower::ServiceExt;

    async fn app() -> (Router, MockEngine) {
        let engine = MockEngine::new();
        let relay = RtmpRelay::new(&Config::default(), Arc::new(engine.clone()));
        relay.init().await.unwrap();
        (router(Arc::new(relay)), engine)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |v| Body::from(v.to_string()));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_code(RelayError::NoSession.code()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_code(RelayError::NotReady("x".into()).code()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for_code(RelayError::AlreadyStreaming.code()), StatusCode::CONFLICT);
        assert_eq!(
            status_for_code(RelayError::InvalidUrl("x".into()).code()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for_code(RelayError::PipelineConstruction("x".into()).code()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let (app, _engine) = app().await;

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, "GET", "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["package"], "rtmprelay");
        assert_eq!(body["requests"], json!(["start", "stop"]));
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_http() {
        let (app, engine) = app().await;

        let (status, _) = call(&app, "POST", "/sessions/peer-1", None).await;
        assert_eq!(status, StatusCode::CREATED);

        let start = json!({"request": "start", "url": "rtmp://live.example.com/app/key"});
        let (status, body) = call(&app, "POST", "/sessions/peer-1/message", Some(start)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["streaming"], "started");
        assert_ne!(body["audio_port"], body["video_port"]);

        let (status, body) = call(&app, "GET", "/sessions/peer-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "streaming");

        let (status, _) = call(&app, "DELETE", "/sessions/peer-1/media", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(engine.released(), 1);

        let (status, _) = call(&app, "DELETE", "/sessions/peer-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, "GET", "/sessions/peer-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], 481);
    }

    #[tokio::test]
    async fn test_message_errors() {
        let (app, _engine) = app().await;
        call(&app, "POST", "/sessions/peer-1", None).await;

        let (status, body) = call(&app, "POST", "/sessions/peer-1/message", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], 411);

        let pause = json!({"request": "pause"});
        let (status, body) = call(&app, "POST", "/sessions/peer-1/message", Some(pause)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], 414);

        let stop = json!({"request": "stop"});
        let (status, body) = call(&app, "POST", "/sessions/peer-1/message", Some(stop)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Live streaming hasn't been started");
    }
}
