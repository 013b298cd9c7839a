use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use drydock_core::proxy::RequestSpec;
use drydock_core::service::SessionService;
use drydock_core::Error;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub platforms: BTreeMap<String, usize>,
    pub metrics: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/wd/hub/session", post(create_session))
        .route("/wd/hub/session/:id", any(session_command))
        .route("/wd/hub/session/:id/*rest", any(session_command))
        .route("/sessions", get(list_sessions))
        .route("/platforms", get(list_platforms))
        .route("/healthz", get(health))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Selenium-wire error body: `{"status": 1, "value": <message>}`.
fn error_response(code: StatusCode, message: String) -> Response {
    (code, Json(json!({ "status": 1, "value": message }))).into_response()
}

fn map_error(err: Error) -> Response {
    let code = match err {
        Error::SessionClosed(_) | Error::SessionTimeout(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(code, err.to_string())
}

/// Opens a session for the posted desired capabilities.
///
/// The engine runs in its own task so endpoint acquisition is not silently
/// torn down with the request future: if the client hangs up while waiting,
/// the dropped guard cancels the token and the engine fails the session,
/// releasing whatever endpoint it was holding.
async fn create_session(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("malformed session request: {err}"),
            )
        }
    };
    let dc = payload
        .get("desiredCapabilities")
        .cloned()
        .unwrap_or(payload);

    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let service = Arc::clone(&state.service);
    let opened = tokio::spawn(async move { service.open_session(dc, token).await }).await;

    match opened {
        Ok(Ok(session)) => {
            guard.disarm();
            counter!("drydock_sessions_created_total").increment(1);
            Json(json!({
                "sessionId": session.id().to_string(),
                "status": 0,
                "value": session.desired_capabilities().clone(),
            }))
            .into_response()
        }
        Ok(Err(err)) => {
            counter!("drydock_sessions_failed_total").increment(1);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) => {
            warn!(error = %err, "session creation task panicked");
            counter!("drydock_sessions_failed_total").increment(1);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "session creation task failed".to_string(),
            )
        }
    }
}

/// Relays a WebDriver command to the session's endpoint, except for DELETE
/// on the session root which closes the session successfully.
async fn session_command(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let id = match params.get("id").and_then(|raw| Uuid::parse_str(raw).ok()) {
        Some(id) => id,
        None => {
            return error_response(
                StatusCode::NOT_FOUND,
                "session ids are UUIDs".to_string(),
            )
        }
    };

    if method == Method::DELETE && !params.contains_key("rest") {
        return match state.service.close_session(id).await {
            Ok(()) => {
                counter!("drydock_sessions_succeeded_total").increment(1);
                Json(json!({
                    "sessionId": id.to_string(),
                    "status": 0,
                    "value": Value::Null,
                }))
                .into_response()
            }
            Err(err) => map_error(err),
        };
    }

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let request = RequestSpec {
        method,
        path,
        headers,
        body,
    };

    match state.service.proxy(id, request).await {
        Ok(reply) => {
            counter!("drydock_proxied_commands_total").increment(1);
            let mut response = Response::builder().status(
                StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            );
            if let Some(out) = response.headers_mut() {
                for (name, value) in reply.headers.iter() {
                    // Recomputed by the server for the relayed body.
                    if name == header::CONTENT_LENGTH
                        || name == header::TRANSFER_ENCODING
                        || name == header::CONNECTION
                    {
                        continue;
                    }
                    out.insert(name.clone(), value.clone());
                }
            }
            response
                .body(axum::body::Body::from(reply.body))
                .unwrap_or_else(|_| {
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to relay endpoint response".to_string(),
                    )
                })
        }
        Err(err) => map_error(err),
    }
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(json!({ "sessions": state.service.list_active().await })).into_response()
}

async fn list_platforms(State(state): State<AppState>) -> Response {
    Json(json!({ "platforms": state.platforms })).into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
