use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::models::{Alert, AlertId, UserId};
use crate::reconciler::{AckOutcome, LoadOutcome};
use crate::service::{AlertFilter, DataService};

// ---

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .route("/api/alerts", get(list::<S>))
        .route("/api/alerts/unread", get(unread::<S>).delete(clear_unread::<S>))
        .route("/api/alerts/{id}/acknowledge", put(acknowledge::<S>))
}

/// Query parameters for the alert listing
#[derive(Debug, Deserialize)]
struct AlertsQuery {
    acknowledged: Option<bool>,
    page: Option<u32>,
    size: Option<u32>,
}

/// Load the requested page and return what the view now shows. A stale
/// page is still a 200; the body's `status` tells the view to show the
/// offline banner.
async fn list<S: DataService>(
    Query(params): Query<AlertsQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    info!("GET /api/alerts {:?}", params);
    let filter = AlertFilter {
        acknowledged: params.acknowledged,
    };
    let outcome = state
        .reconciler
        .load_alerts(
            filter,
            params.page.unwrap_or(0),
            params.size.unwrap_or(state.page_size),
        )
        .await;

    match outcome {
        LoadOutcome::Failed(e) => e.into_response(),
        _ => Json(state.reconciler.alerts_view().await).into_response(),
    }
}

#[derive(Serialize)]
struct UnreadResponse {
    count: usize,
    alerts: Vec<Alert>,
}

async fn unread<S: DataService>(State(state): State<AppState<S>>) -> Json<UnreadResponse> {
    Json(UnreadResponse {
        count: state.reconciler.unread_count().await,
        alerts: state.reconciler.unread_alerts().await,
    })
}

async fn clear_unread<S: DataService>(State(state): State<AppState<S>>) -> Json<UnreadResponse> {
    // ---
    state.reconciler.clear_unread().await;
    Json(UnreadResponse {
        count: 0,
        alerts: Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody {
    user_id: UserId,
}

#[derive(Serialize)]
struct AcknowledgeResponse {
    outcome: AckOutcome,
}

async fn acknowledge<S: DataService>(
    Path(alert_id): Path<AlertId>,
    State(state): State<AppState<S>>,
    Json(body): Json<AcknowledgeBody>,
) -> Response {
    // ---
    info!("PUT /api/alerts/{}/acknowledge by {}", alert_id, body.user_id);
    match state.reconciler.acknowledge(alert_id, body.user_id).await {
        Ok(outcome) => Json(AcknowledgeResponse { outcome }).into_response(),
        Err(e) => e.into_response(),
    }
}
