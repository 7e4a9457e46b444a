use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use wsn_monitor::models::{LinkForm, ThresholdForm};
use wsn_monitor::{AlertFilter, ApiError, DataService, HttpDataService, PageRequest};

// ---

/// In-process stand-in for the WSN backend.
struct MockBackend {
    /// Access token the backend currently accepts.
    valid_token: Mutex<String>,
    allow_refresh: AtomicBool,
    refresh_calls: AtomicUsize,
    alert_calls: AtomicUsize,
    /// Decoded node id and query string of every node DELETE.
    deleted: Mutex<Vec<(String, Option<String>)>>,
    /// Requests that matched no route.
    stray: Mutex<Vec<String>>,
}

type Shared = Arc<MockBackend>;

fn authorized(backend: &MockBackend, headers: &HeaderMap) -> bool {
    // ---
    let expected = format!("Bearer {}", backend.valid_token.lock().unwrap());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

async fn login(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    // ---
    if body["password"] != "secret" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let token = backend.valid_token.lock().unwrap().clone();
    Json(json!({"accessToken": token, "refreshToken": "refresh-1"})).into_response()
}

async fn refresh(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    // ---
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.allow_refresh.load(Ordering::SeqCst) || body["refreshToken"] != "refresh-1" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "refresh rejected"})))
            .into_response();
    }
    let token = backend.valid_token.lock().unwrap().clone();
    Json(json!({"accessToken": token})).into_response()
}

async fn alerts(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    // ---
    backend.alert_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&backend, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "content": [{
            "alertId": 1,
            "nodeId": "node-1",
            "sensorId": "temp-1",
            "level": "WARNING",
            "message": "temperature above warning",
            "timestamp": "2025-03-26T18:45:00Z",
            "acknowledged": false
        }],
        "totalElements": 1,
        "totalPages": 1,
        "number": 0,
        "size": 20
    }))
    .into_response()
}

async fn acknowledge(Path(id): Path<i64>) -> Response {
    // ---
    if id == 404 {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "no such alert"}))).into_response();
    }
    Json(json!({
        "alertId": id,
        "nodeId": "node-1",
        "sensorId": "temp-1",
        "level": "CRITICAL",
        "message": "acknowledged",
        "timestamp": "2025-03-26T18:45:00Z",
        "acknowledged": true,
        "acknowledgedBy": 5,
        "acknowledgedAt": "2025-03-26T19:00:00Z"
    }))
    .into_response()
}

async fn threshold() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "message": "threshold ordering violated",
            "fieldErrors": {"warning": "must be greater than info"}
        })),
    )
        .into_response()
}

async fn topology() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

async fn slow_node() -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK.into_response()
}

async fn delete_node(
    State(backend): State<Shared>,
    Path(id): Path<String>,
    uri: Uri,
) -> StatusCode {
    // ---
    let query = uri.query().map(str::to_string);
    backend.deleted.lock().unwrap().push((id, query));
    StatusCode::NO_CONTENT
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

async fn unmatched(State(backend): State<Shared>, uri: Uri) -> StatusCode {
    backend.stray.lock().unwrap().push(uri.to_string());
    StatusCode::NOT_FOUND
}

async fn spawn_backend() -> Result<(String, Shared)> {
    // ---
    let backend = Arc::new(MockBackend {
        valid_token: Mutex::new("access-1".to_string()),
        allow_refresh: AtomicBool::new(true),
        refresh_calls: AtomicUsize::new(0),
        alert_calls: AtomicUsize::new(0),
        deleted: Mutex::new(Vec::new()),
        stray: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/alerts", get(alerts))
        .route("/api/alerts/{id}/acknowledge", put(acknowledge))
        .route("/api/thresholds/{id}", put(threshold))
        .route("/api/topology", get(topology))
        .route("/api/nodes/{id}", get(slow_node).delete(delete_node))
        .route("/api/topology/links", post(forbidden))
        .fallback(unmatched)
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{}", addr), backend))
}

async fn logged_in(base: &str) -> Result<HttpDataService> {
    let service = HttpDataService::new(base, Duration::from_millis(500))?;
    service.login("operator", "secret").await?;
    Ok(service)
}

fn first_page() -> PageRequest<AlertFilter> {
    PageRequest::new(AlertFilter::pending(), 0, 20)
}

#[tokio::test]
async fn lists_alerts_with_bearer_token() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    let page = service.list_alerts(&first_page()).await?;
    assert_eq!(page.total_elements, 1);
    assert_eq!(page.content[0].alert_id, 1);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_login_is_an_auth_error() -> Result<()> {
    // ---
    let (base, _backend) = spawn_backend().await?;
    let service = HttpDataService::new(&base, Duration::from_millis(500))?;

    let err = service.login("operator", "wrong").await.unwrap_err();
    assert_eq!(err, ApiError::Auth { status: 401 });
    assert!(service.access_token().await.is_none());
    Ok(())
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    // Backend rotates the access token
    *backend.valid_token.lock().unwrap() = "access-2".to_string();

    let page = service.list_alerts(&first_page()).await?;
    assert_eq!(page.content.len(), 1);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.alert_calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.access_token().await.as_deref(), Some("access-2"));
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    *backend.valid_token.lock().unwrap() = "access-2".to_string();

    let request = first_page();
    let (a, b) = tokio::join!(service.list_alerts(&request), service.list_alerts(&request));
    assert_eq!(a?.total_elements, 1);
    assert_eq!(b?.total_elements, 1);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.access_token().await.as_deref(), Some("access-2"));
    Ok(())
}

#[tokio::test]
async fn forbidden_is_not_refreshed() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    let form = LinkForm {
        source_node_id: "node-1".to_string(),
        target_node_id: "node-2".to_string(),
        signal_strength: 60,
    };
    assert_eq!(
        service.create_link(&form).await.unwrap_err(),
        ApiError::Auth { status: 403 }
    );
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(service.access_token().await.as_deref(), Some("access-1"));
    Ok(())
}

#[tokio::test]
async fn node_ids_stay_inside_their_path_segment() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    service.delete_node("../thresholds/1").await?;
    service.delete_node("n 1?x=y#frag").await?;

    let deleted = backend.deleted.lock().unwrap().clone();
    assert_eq!(
        deleted,
        vec![
            ("../thresholds/1".to_string(), None),
            ("n 1?x=y#frag".to_string(), None),
        ]
    );
    assert!(backend.stray.lock().unwrap().is_empty());

    // Dot segments would be normalized away, so they never leave the client
    assert!(matches!(
        service.delete_node("..").await,
        Err(ApiError::Validation { .. })
    ));
    assert!(matches!(
        service.delete_node("").await,
        Err(ApiError::Validation { .. })
    ));
    assert_eq!(backend.deleted.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn base_path_is_kept_in_front_of_endpoints() -> Result<()> {
    // ---
    let (base, _backend) = spawn_backend().await?;

    // A base with a trailing slash must not produce `//api/...`
    let service = logged_in(&format!("{}/", base)).await?;
    assert_eq!(service.list_alerts(&first_page()).await?.total_elements, 1);

    assert!(matches!(
        HttpDataService::new("not a url", Duration::from_secs(1)),
        Err(ApiError::InvalidUrl(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failed_refresh_terminates_the_session() -> Result<()> {
    // ---
    let (base, backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    *backend.valid_token.lock().unwrap() = "access-2".to_string();
    backend.allow_refresh.store(false, Ordering::SeqCst);

    let err = service.list_alerts(&first_page()).await.unwrap_err();
    assert_eq!(err, ApiError::SessionExpired);
    assert!(service.access_token().await.is_none());

    // Later calls fail fast without reaching the backend
    let calls_before = backend.alert_calls.load(Ordering::SeqCst);
    let err = service.list_alerts(&first_page()).await.unwrap_err();
    assert_eq!(err, ApiError::SessionExpired);
    assert_eq!(backend.alert_calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn classifies_backend_failures() -> Result<()> {
    // ---
    let (base, _backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    let acked = service.acknowledge_alert(3, 5).await?;
    assert!(acked.acknowledged);
    assert!(acked.is_consistent());

    assert_eq!(
        service.acknowledge_alert(404, 5).await.unwrap_err(),
        ApiError::NotFound
    );

    let form = ThresholdForm {
        info: 5.0,
        warning: 10.0,
        danger: 20.0,
    };
    match service.update_threshold(1, &form).await.unwrap_err() {
        ApiError::Validation { message, fields } => {
            assert_eq!(message, "threshold ordering violated");
            assert!(fields.contains_key("warning"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    assert!(matches!(
        service.get_topology().await.unwrap_err(),
        ApiError::Server { status: 500, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn slow_backend_times_out() -> Result<()> {
    // ---
    let (base, _backend) = spawn_backend().await?;
    let service = logged_in(&base).await?;

    assert_eq!(service.get_node("node-1").await.unwrap_err(), ApiError::Timeout);
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() -> Result<()> {
    // ---
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let service = HttpDataService::new(&format!("http://{}", addr), Duration::from_millis(500))?;
    let err = service.login("operator", "secret").await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)), "got {err:?}");
    assert!(err.is_connectivity());
    Ok(())
}
