use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::AppState;
use crate::models::SensorReading;
use crate::service::{DataService, ReadingFilter, TimeRange};

// ---

pub fn router<S>() -> Router<AppState<S>>
where
    S: DataService + 'static,
{
    // ---
    Router::new()
        .route("/api/readings/latest", get(latest::<S>))
        .route("/api/sensors/{id}/readings", get(readings::<S>))
        .route("/api/sensors/{id}/stats", get(stats::<S>))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GaugeReading {
    #[serde(flatten)]
    reading: SensorReading,
    gauge_percent: f64,
}

/// Latest reading per sensor, independent of any page the views show.
async fn latest<S: DataService>(State(state): State<AppState<S>>) -> Json<Vec<GaugeReading>> {
    // ---
    let readings = state.reconciler.latest_readings().await;
    debug!("GET /api/readings/latest - {} sensors", readings.len());
    Json(
        readings
            .into_iter()
            .map(|reading| GaugeReading {
                gauge_percent: state.reconciler.gauge_percent(&reading),
                reading,
            })
            .collect(),
    )
}

/// Optional time range; both ends must be present to apply.
#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct WindowResponse {
    readings: Vec<SensorReading>,
    /// Set when the refresh failed and the cached window is shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Refresh the sensor's readings from the backend, then return its recent
/// window. If the refresh fails but a window is cached, the cached window
/// is returned with the error attached.
async fn readings<S: DataService>(
    Path(sensor_id): Path<String>,
    Query(params): Query<RangeQuery>,
    State(state): State<AppState<S>>,
) -> Response {
    // ---
    let range = match (params.start, params.end) {
        (Some(start), Some(end)) => Some(TimeRange { start, end }),
        _ => None,
    };
    let filter = ReadingFilter {
        sensor_id: Some(sensor_id.clone()),
        node_id: None,
        range,
    };

    let refreshed = state.reconciler.load_readings(&filter).await;
    let window = state.reconciler.recent_readings(&sensor_id).await;
    match refreshed {
        Ok(_) => Json(WindowResponse {
            readings: window,
            error: None,
        })
        .into_response(),
        Err(e) if !window.is_empty() => {
            warn!("Serving cached readings for {}: {}", sensor_id, e);
            Json(WindowResponse {
                readings: window,
                error: Some(e.to_string()),
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn stats<S: DataService>(Path(sensor_id): Path<String>, State(state): State<AppState<S>>) -> Response {
    // ---
    match state.reconciler.sensor_stats(&sensor_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}
