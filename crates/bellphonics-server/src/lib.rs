//! Bellphonics relay server: HTTP surface over the admission gate and the
//! delivery queue.

pub mod api;
pub mod config;
pub mod discovery;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use bellphonics_gate::AdmissionGate;
use bellphonics_voice::{BackendKind, DeliveryQueue};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Admission policy and its replay, cooldown, rate and origin state.
    pub gate: Arc<AdmissionGate>,
    /// Queue feeding the speech worker.
    pub queue: Arc<DeliveryQueue>,
    /// Instance name reported by `/handshake`.
    pub instance_name: String,
    /// Backend the queue speaks through.
    pub tts_backend: BackendKind,
}

/// Maximum request body size (64 KiB). Speech events are a few hundred bytes.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/handshake", get(api::handshake_handler))
        .route("/speak", post(api::speak_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
