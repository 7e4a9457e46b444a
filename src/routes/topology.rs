use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::models::LinkForm;
use crate::service::DataService;

// ---

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .route("/api/topology", get(view::<S>))
        .route("/api/topology/links", post(create_link::<S>))
}

#[derive(Debug, Deserialize)]
struct TopologyQuery {
    #[serde(default)]
    refresh: bool,
}

/// Links plus the derived node set. `?refresh=true` fetches a snapshot
/// first; otherwise whatever the push channel last delivered is returned.
async fn view<S: DataService>(
    Query(params): Query<TopologyQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    if params.refresh {
        if let Err(e) = state.reconciler.load_topology().await {
            warn!("Topology refresh failed: {}", e);
            return e.into_response();
        }
    }
    Json(state.reconciler.topology().await).into_response()
}

async fn create_link<S: DataService>(
    State(state): State<AppState<S>>,
    Json(form): Json<LinkForm>,
) -> Response {
    // ---
    info!(
        "POST /api/topology/links {} <-> {}",
        form.source_node_id, form.target_node_id
    );
    match state.reconciler.create_link(&form).await {
        Ok(link) => (StatusCode::CREATED, Json(link)).into_response(),
        Err(e) => e.into_response(),
    }
}
