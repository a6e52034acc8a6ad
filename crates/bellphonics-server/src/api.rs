//! Request handlers for `/speak` and `/handshake`.

use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bellphonics_types::{AdmissionDecision, AdmissionReason, SpeechEvent};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Seconds a rate-limited client is told to wait.
const RETRY_AFTER_SECONDS: u64 = 60;

/// Errors produced before an event reaches the admission gate.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The body was not a decodable speech event.
    #[error("{0}")]
    InvalidBody(#[from] JsonRejection),
    /// The event decoded but violates a field constraint.
    #[error("invalid event: {0}")]
    Unprocessable(#[from] bellphonics_types::ValidationError),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            // 400 for syntax, 422 for shape, 415 for a missing content type.
            ApiError::InvalidBody(rejection) => rejection.status(),
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match self {
            ApiError::InvalidBody(rejection) => rejection.body_text(),
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Body returned by `POST /speak` for every admission outcome.
#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub ok: bool,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AdmissionReason>,
}

impl From<AdmissionDecision> for SpeakResponse {
    fn from(decision: AdmissionDecision) -> Self {
        Self {
            ok: true,
            accepted: decision.allowed,
            reason: (!decision.allowed).then_some(decision.reason),
        }
    }
}

/// HTTP status for an admission outcome. Suppressed repeats are not errors.
fn status_for(reason: AdmissionReason) -> StatusCode {
    match reason {
        AdmissionReason::Unauthorized => StatusCode::UNAUTHORIZED,
        AdmissionReason::ForbiddenOrigin => StatusCode::FORBIDDEN,
        AdmissionReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AdmissionReason::Ok | AdmissionReason::DuplicateEvent | AdmissionReason::Cooldown => {
            StatusCode::OK
        }
    }
}

/// Handler for `POST /speak`.
///
/// Decodes and validates the event, runs it through the admission gate for
/// the connecting peer, and enqueues it for speech when admitted.
pub async fn speak_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<SpeechEvent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(event) = payload?;
    event.validate()?;

    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // Name-based allowlist entries may need a blocking DNS lookup.
    let gate = state.gate.clone();
    let (decision, event) = tokio::task::spawn_blocking(move || {
        let decision = gate.evaluate(&event, peer.ip(), credential.as_deref());
        (decision, event)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?;

    if decision.allowed {
        state.queue.enqueue(event);
    }

    let status = status_for(decision.reason);
    let mut response = (status, Json(SpeakResponse::from(decision))).into_response();
    if status == StatusCode::TOO_MANY_REQUESTS {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECONDS));
    }
    Ok(response)
}

/// Discovery payload returned by `GET /handshake`.
#[derive(Debug, Serialize)]
pub struct HandshakeResponse {
    pub service: &'static str,
    pub name: String,
    pub version: &'static str,
    pub path: &'static str,
    pub auth_header: &'static str,
    pub tts_backend: &'static str,
}

/// Handler for `GET /handshake`. Requires no credential.
pub async fn handshake_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<HandshakeResponse> {
    Json(HandshakeResponse {
        service: "bellphonics",
        name: state.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        path: "/speak",
        auth_header: "X-API-Key",
        tts_backend: state.tts_backend.as_str(),
    })
}
