// src/routes/health.rs
//! Health check endpoint for the local read API.
//!
//! This module defines the `/health` route used by container orchestrators
//! and scripts to verify that the monitor is running. It is a sibling module
//! in the `routes` directory and follows the Explicit Module Boundary
//! Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route
//!
//! The response also carries the session state, so a dashboard can tell
//! "monitor up, backend session expired" apart from "monitor down".

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::reconciler::SessionState;
use crate::service::DataService;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    session: SessionState,
}

/// Handle `GET /health`.
///
/// Reads the session state only; never touches the backend.
async fn health<S: DataService>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        session: state.reconciler.session_state().await,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    Router::new().route("/health", get(health::<S>))
}
