//! HTTP route handlers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::Json;
use serde::Serialize;

use super::middleware::AdmissionGate;
use crate::store::CounterStore;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Admission gate for the protected route group
    pub gate: Arc<AdmissionGate>,
    /// The process-wide counter store
    pub store: Arc<dyn CounterStore>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub backend: &'static str,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub identity: String,
}

pub async fn root() -> &'static str {
    "Server is running."
}

/// Report liveness and whether the counter store answers.
///
/// An unreachable store is a degraded mode, not a failure of this process,
/// so the status code stays 200.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach counter store");
            "down"
        }
    };

    Json(HealthResponse {
        status: "ok",
        store,
        backend: state.store.name(),
    })
}

/// Echo the identity the caller is rate limited under.
pub async fn identity(State(state): State<AppState>, request: Request) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        identity: state.gate.identify(&request).to_string(),
    })
}
