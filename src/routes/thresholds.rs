use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::models::{ThresholdForm, ThresholdId};
use crate::reconciler::LoadOutcome;
use crate::service::DataService;

// ---

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .route("/api/thresholds", get(list::<S>))
        .route("/api/thresholds/{id}", put(update::<S>))
}

#[derive(Debug, Deserialize)]
struct ThresholdsQuery {
    page: Option<u32>,
    size: Option<u32>,
}

async fn list<S: DataService>(
    Query(params): Query<ThresholdsQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    info!("GET /api/thresholds {:?}", params);
    let outcome = state
        .reconciler
        .load_thresholds(
            params.page.unwrap_or(0),
            params.size.unwrap_or(state.page_size),
        )
        .await;

    match outcome {
        LoadOutcome::Failed(e) => e.into_response(),
        _ => Json(state.reconciler.thresholds_view().await).into_response(),
    }
}

/// Out-of-order boundaries are rejected with 422 and per-field messages
/// before anything is sent upstream.
async fn update<S: DataService>(
    Path(threshold_id): Path<ThresholdId>,
    State(state): State<AppState<S>>,
    Json(form): Json<ThresholdForm>,
) -> Response {
    // ---
    info!("PUT /api/thresholds/{} {:?}", threshold_id, form);
    match state.reconciler.update_threshold(threshold_id, &form).await {
        Ok(threshold) => Json(threshold).into_response(),
        Err(e) => e.into_response(),
    }
}
