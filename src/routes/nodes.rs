use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::models::NodeForm;
use crate::reconciler::LoadOutcome;
use crate::service::DataService;

// ---

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .route("/api/nodes", get(list::<S>).post(create::<S>))
        .route(
            "/api/nodes/{id}",
            get(fetch::<S>).put(update::<S>).delete(remove::<S>),
        )
}

#[derive(Debug, Deserialize)]
struct NodesQuery {
    page: Option<u32>,
    size: Option<u32>,
}

async fn list<S: DataService>(
    Query(params): Query<NodesQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    info!("GET /api/nodes {:?}", params);
    let outcome = state
        .reconciler
        .load_nodes(
            params.page.unwrap_or(0),
            params.size.unwrap_or(state.page_size),
        )
        .await;

    match outcome {
        LoadOutcome::Failed(e) => e.into_response(),
        _ => Json(state.reconciler.nodes_view().await).into_response(),
    }
}

async fn fetch<S: DataService>(Path(node_id): Path<String>, State(state): State<AppState<S>>) -> Response {
    match state.reconciler.get_node(&node_id).await {
        Ok(node) => Json(node).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create<S: DataService>(State(state): State<AppState<S>>, Json(form): Json<NodeForm>) -> Response {
    // ---
    info!("POST /api/nodes {}", form.name);
    match state.reconciler.create_node(&form).await {
        Ok(node) => (StatusCode::CREATED, Json(node)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update<S: DataService>(
    Path(node_id): Path<String>,
    State(state): State<AppState<S>>,
    Json(form): Json<NodeForm>,
) -> Response {
    // ---
    info!("PUT /api/nodes/{}", node_id);
    match state.reconciler.update_node(&node_id, &form).await {
        Ok(node) => Json(node).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn remove<S: DataService>(Path(node_id): Path<String>, State(state): State<AppState<S>>) -> Response {
    // ---
    info!("DELETE /api/nodes/{}", node_id);
    match state.reconciler.delete_node(&node_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
