//! HTTP surface: liveness, the two start-job endpoints and the provider
//! callback.
use std::any::Any;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, Level};

use crate::relay::{CallbackEnvelope, Flow, Relay, RelayError};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

/// Error returned by handlers, rendered as `{ "error": <message> }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::BadRequest(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Start-job request body. Parsed leniently so that a missing or malformed
/// body is reported as a missing id rather than a framework rejection.
#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(rename = "recordId", default)]
    record_id: Option<Value>,
}

impl StartRequest {
    fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn record_id(&self) -> Option<String> {
        match self.record_id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Application routes with the shared middleware stack.
pub fn router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/", get(liveness))
        .route("/generate/recreator", post(generate_recreator))
        .route("/generate/poses", post(generate_poses))
        .route("/wavespeed/callback", post(wavespeed_callback))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

/// GET / -- plain-text liveness acknowledgment.
async fn liveness() -> &'static str {
    "wavespeed relay is running"
}

/// POST /generate/recreator
async fn generate_recreator(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    start(&state, Flow::Recreator, &body).await
}

/// POST /generate/poses
async fn generate_poses(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    start(&state, Flow::Poses, &body).await
}

async fn start(state: &AppState, flow: Flow, body: &[u8]) -> ApiResult<Json<Value>> {
    let request = StartRequest::parse(body);
    let record_id = request.record_id();
    let job = state.relay.start_job(flow, record_id.as_deref()).await?;
    Ok(Json(json!({ "ok": true, "job": job })))
}

/// POST /wavespeed/callback
///
/// Acknowledged with `{ok: true}` for any JSON body (or an empty one),
/// whether or not the record could be updated, so the provider never
/// retries. Only a body that is not JSON at all gets a 500.
async fn wavespeed_callback(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let envelope = parse_callback(&body)
        .map_err(|err| ApiError::Internal(format!("invalid callback body: {err}")))?;
    let outcome = state.relay.handle_callback(&envelope).await;
    debug!(?outcome, "callback handled");
    Ok(Json(json!({ "ok": true })))
}

fn parse_callback(body: &[u8]) -> serde_json::Result<CallbackEnvelope> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CallbackEnvelope::default());
    }
    serde_json::from_slice(body)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(message).into_response()
}
