//! Local read API gateway.
//!
//! Each sibling module builds a subrouter over the shared [`AppState`];
//! this gateway merges them so `main.rs` never sees individual endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::reconciler::Reconciler;
use crate::service::DataService;

mod alerts;
mod health;
mod nodes;
mod sensors;
mod thresholds;
mod topology;

// ---

/// State shared by every route.
pub struct AppState<S> {
    pub reconciler: Arc<Reconciler<S>>,
    /// Page size used when a request does not name one.
    pub page_size: u32,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            reconciler: Arc::clone(&self.reconciler),
            page_size: self.page_size,
        }
    }
}

pub fn router<S>(reconciler: Arc<Reconciler<S>>, page_size: u32) -> Router
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .merge(alerts::router())
        .merge(nodes::router())
        .merge(sensors::router())
        .merge(thresholds::router())
        .merge(topology::router())
        .merge(health::router())
        .with_state(AppState {
            reconciler,
            page_size,
        })
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match &self {
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Auth { .. } | ApiError::SessionExpired => StatusCode::UNAUTHORIZED,
            ApiError::Network(_) | ApiError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Server { .. } | ApiError::Decode(_) => StatusCode::BAD_GATEWAY,
            ApiError::InvalidUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let fields = match &self {
            ApiError::Validation { fields, .. } => fields.clone(),
            _ => BTreeMap::new(),
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                fields,
            }),
        )
            .into_response()
    }
}
