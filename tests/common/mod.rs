//! Shared fixtures: a scripted in-memory Data Service.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::oneshot;

use wsn_monitor::models::{
    Alert, AlertId, AlertLevel, LinkForm, NetworkLink, NodeForm, NodeStatus, Page, SensorNode,
    SensorReading, Threshold, ThresholdForm, ThresholdId, UserId,
};
use wsn_monitor::{AlertFilter, ApiError, ApiResult, DataService, PageRequest, ReadingFilter};

// ---

/// Responses handed out in call order. Each one can be resolved up front
/// or held back to simulate a slow request.
pub struct Script<T> {
    queue: Mutex<VecDeque<oneshot::Receiver<ApiResult<T>>>>,
    calls: AtomicUsize,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T> Script<T> {
    // ---
    pub fn ready(&self, result: ApiResult<T>) {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        self.queue.lock().unwrap().push_back(rx);
    }

    pub fn pending(&self) -> oneshot::Sender<ApiResult<T>> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self, what: &str) -> ApiResult<T> {
        // ---
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected {what} call"));
        rx.await.expect("scripted response dropped")
    }
}

#[derive(Default)]
pub struct FakeService {
    pub alerts: Script<Page<Alert>>,
    pub acks: Script<Alert>,
    pub nodes: Script<Page<SensorNode>>,
    pub node: Script<SensorNode>,
    pub deletes: Script<()>,
    pub readings: Script<Vec<SensorReading>>,
    pub topology: Script<Vec<NetworkLink>>,
    pub links: Script<NetworkLink>,
    pub thresholds: Script<Page<Threshold>>,
    pub threshold: Script<Threshold>,
}

impl DataService for FakeService {
    // ---
    async fn list_alerts(&self, _request: &PageRequest<AlertFilter>) -> ApiResult<Page<Alert>> {
        self.alerts.next("list_alerts").await
    }

    async fn acknowledge_alert(&self, _alert_id: AlertId, _user_id: UserId) -> ApiResult<Alert> {
        self.acks.next("acknowledge_alert").await
    }

    async fn list_nodes(&self, _request: &PageRequest<()>) -> ApiResult<Page<SensorNode>> {
        self.nodes.next("list_nodes").await
    }

    async fn get_node(&self, _node_id: &str) -> ApiResult<SensorNode> {
        self.node.next("get_node").await
    }

    async fn create_node(&self, _form: &NodeForm) -> ApiResult<SensorNode> {
        self.node.next("create_node").await
    }

    async fn update_node(&self, _node_id: &str, _form: &NodeForm) -> ApiResult<SensorNode> {
        self.node.next("update_node").await
    }

    async fn delete_node(&self, _node_id: &str) -> ApiResult<()> {
        self.deletes.next("delete_node").await
    }

    async fn list_readings(&self, _filter: &ReadingFilter) -> ApiResult<Vec<SensorReading>> {
        self.readings.next("list_readings").await
    }

    async fn get_topology(&self) -> ApiResult<Vec<NetworkLink>> {
        self.topology.next("get_topology").await
    }

    async fn create_link(&self, _form: &LinkForm) -> ApiResult<NetworkLink> {
        self.links.next("create_link").await
    }

    async fn list_thresholds(&self, _request: &PageRequest<()>) -> ApiResult<Page<Threshold>> {
        self.thresholds.next("list_thresholds").await
    }

    async fn update_threshold(
        &self,
        _threshold_id: ThresholdId,
        _form: &ThresholdForm,
    ) -> ApiResult<Threshold> {
        self.threshold.next("update_threshold").await
    }
}

// --- builders

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + seconds, 0).unwrap()
}

pub fn alert(id: AlertId) -> Alert {
    Alert {
        alert_id: id,
        node_id: "node-1".to_string(),
        sensor_id: "temp-1".to_string(),
        level: AlertLevel::Warning,
        message: format!("alert {id}"),
        timestamp: at(id),
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

pub fn acknowledged(id: AlertId, by: UserId, when: DateTime<Utc>) -> Alert {
    Alert {
        acknowledged: true,
        acknowledged_by: Some(by),
        acknowledged_at: Some(when),
        ..alert(id)
    }
}

pub fn page<T>(content: Vec<T>, total_elements: u64, page: u32) -> Page<T> {
    Page {
        total_pages: 1,
        size: 20,
        content,
        total_elements,
        page,
    }
}

pub fn reading(sensor: &str, t: i64, value: f64) -> SensorReading {
    SensorReading {
        sensor_id: sensor.to_string(),
        node_id: "node-1".to_string(),
        value,
        timestamp: at(t),
        sensor_type: None,
    }
}

pub fn node(id: &str, status: NodeStatus) -> SensorNode {
    SensorNode {
        node_id: id.to_string(),
        name: format!("Node {id}"),
        location: "greenhouse".to_string(),
        coordinates: None,
        status,
        last_heartbeat: Some(at(0)),
    }
}

pub fn link(id: i64, source: &str, target: &str) -> NetworkLink {
    NetworkLink {
        link_id: id,
        source_node_id: source.to_string(),
        target_node_id: target.to_string(),
        signal_strength: 70,
        last_updated: at(id),
    }
}

pub fn threshold(id: ThresholdId, info: f64, warning: f64, danger: f64) -> Threshold {
    Threshold {
        threshold_id: id,
        sensor_type: "temperature".to_string(),
        info,
        warning,
        danger,
        unit: Some("C".to_string()),
    }
}

pub fn server_error() -> ApiError {
    ApiError::Server {
        status: 500,
        message: "Internal Server Error".to_string(),
    }
}
