//! Live State Reconciler.
//!
//! Owns the in-memory view of alerts, readings, nodes, thresholds and
//! topology, and is the only writer to it. Three kinds of input flow in:
//!
//! - paginated snapshots (`load_*`), applied wholesale per page slot, with
//!   responses for superseded requests dropped;
//! - user mutations (acknowledge, node/threshold/link writes), applied only
//!   after the Data Service confirms them;
//! - push events, merged idempotently and gated by timestamp.
//!
//! Every merge runs under one write guard that is never held across an
//! `.await`, so handlers never interleave mid-mutation. Readers subscribe to
//! a [`Revision`] counter and pull snapshots through the `*_view` accessors.

use std::collections::{BTreeSet, VecDeque};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::{
    Alert, AlertId, LinkForm, NetworkLink, NodeForm, NodeId, Page, SensorNode, SensorReading,
    Threshold, ThresholdForm, ThresholdId, UserId,
};
use crate::push::PushEvent;
use crate::service::{AlertFilter, ApiResult, DataService, PageRequest, ReadingFilter};

mod gauge;
mod readings;
mod slot;
mod stats;

pub use gauge::{gauge_percent, GaugePolicy};
pub use slot::{LoadOutcome, PageStatus, PageView};
pub use stats::{compute_stats, Stats, StatsError, Trend, TrendPolicy};

use readings::ReadingStore;
use slot::{PageSlot, Ticket};

// ---

/// Tunables that shape the live view.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerPolicy {
    /// Readings kept per sensor for charts and stats.
    pub reading_window: usize,
    /// Pushed alerts kept in the unread buffer.
    pub alert_buffer_cap: usize,
    pub trend: TrendPolicy,
    pub gauge: GaugePolicy,
}

impl Default for ReconcilerPolicy {
    fn default() -> Self {
        Self {
            reading_window: 100,
            alert_buffer_cap: 100,
            trend: TrendPolicy::default(),
            gauge: GaugePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Active,
    /// Credential refresh failed; the view should show "session expired".
    Expired,
    LoggedOut,
}

/// Change notification published to subscribers after every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub seq: u64,
    pub session: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AckOutcome {
    Acknowledged,
    /// Already acknowledged locally; no request was sent.
    AlreadyAcknowledged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyView {
    pub links: Vec<NetworkLink>,
    /// Union of link endpoints.
    pub nodes: BTreeSet<NodeId>,
}

/// Nodes that appear in the link set.
pub fn topology_nodes(links: &[NetworkLink]) -> BTreeSet<NodeId> {
    links
        .iter()
        .flat_map(|l| [l.source_node_id.clone(), l.target_node_id.clone()])
        .collect()
}

#[derive(Debug)]
struct LiveState {
    // ---
    session: SessionState,
    alerts: PageSlot<Alert, AlertFilter>,
    nodes: PageSlot<SensorNode, ()>,
    thresholds: PageSlot<Threshold, ()>,
    readings: ReadingStore,
    /// Pushed alerts, newest first.
    unread: VecDeque<Alert>,
    links: Vec<NetworkLink>,
    /// Topology fetches issued; only the latest may apply.
    topology_fetches: u64,
    /// Topology pushes applied; a push during a fetch wins.
    topology_pushes: u64,
}

impl LiveState {
    // ---
    fn new(policy: &ReconcilerPolicy) -> Self {
        Self {
            session: SessionState::Active,
            alerts: PageSlot::default(),
            nodes: PageSlot::default(),
            thresholds: PageSlot::default(),
            readings: ReadingStore::new(policy.reading_window),
            unread: VecDeque::new(),
            links: Vec::new(),
            topology_fetches: 0,
            topology_pushes: 0,
        }
    }

    fn clear(&mut self, session: SessionState) {
        // ---
        self.session = session;
        self.alerts.reset();
        self.nodes.reset();
        self.thresholds.reset();
        self.readings.clear();
        self.unread.clear();
        self.links.clear();
        self.topology_fetches += 1;
    }

    fn is_known_acknowledged(&self, alert_id: AlertId) -> bool {
        // ---
        let in_page = self
            .alerts
            .page()
            .into_iter()
            .flat_map(|p| p.content.iter());
        in_page
            .chain(self.unread.iter())
            .any(|a| a.alert_id == alert_id && a.acknowledged)
    }

    fn push_alert(&mut self, alert: Alert, cap: usize) -> bool {
        // ---
        if self.unread.iter().any(|a| a.alert_id == alert.alert_id)
            || self.is_known_acknowledged(alert.alert_id)
        {
            return false;
        }
        self.unread.push_front(alert);
        self.unread.truncate(cap);
        true
    }
}

pub struct Reconciler<S> {
    // ---
    service: S,
    policy: ReconcilerPolicy,
    state: RwLock<LiveState>,
    revision: watch::Sender<Revision>,
}

impl<S: DataService> Reconciler<S> {
    // ---
    /// Start a session with empty state.
    pub fn new(service: S, policy: ReconcilerPolicy) -> Self {
        // ---
        let (revision, _) = watch::channel(Revision {
            seq: 0,
            session: SessionState::Active,
        });
        Self {
            state: RwLock::new(LiveState::new(&policy)),
            service,
            policy,
            revision,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn policy(&self) -> &ReconcilerPolicy {
        &self.policy
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.revision.subscribe()
    }

    fn publish(&self, session: SessionState) {
        self.revision.send_modify(|r| {
            r.seq += 1;
            r.session = session;
        });
    }

    /// Clear all state at logout. Responses still in flight are dropped.
    pub async fn teardown(&self) {
        // ---
        self.state.write().await.clear(SessionState::LoggedOut);
        info!("Live state torn down");
        self.publish(SessionState::LoggedOut);
    }

    /// Escalate a session-expired error: drop the state and tell subscribers.
    fn expire(&self, state: &mut LiveState) {
        // ---
        if state.session == SessionState::Expired {
            return;
        }
        warn!("Session expired, clearing live state");
        state.clear(SessionState::Expired);
        self.publish(SessionState::Expired);
    }

    /// Session-expired errors tear the state down; everything else only
    /// reaches the caller.
    async fn observe<T>(&self, result: &ApiResult<T>) {
        if let Err(ApiError::SessionExpired) = result {
            let mut state = self.state.write().await;
            self.expire(&mut state);
        }
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.read().await.session
    }

    /// A reconciler serves one session. Once it has expired or been torn
    /// down, nothing is fetched or written through it.
    async fn ensure_active(&self) -> ApiResult<()> {
        // ---
        let session = self.state.read().await.session;
        if session == SessionState::Active {
            Ok(())
        } else {
            debug!("Refusing request, session is {:?}", session);
            Err(ApiError::SessionExpired)
        }
    }

    // --- page loads

    async fn begin_load<T, F>(
        &self,
        request: PageRequest<F>,
        slot: impl FnOnce(&mut LiveState) -> &mut PageSlot<T, F>,
    ) -> ApiResult<Ticket>
    where
        T: Clone,
        F: Clone,
    {
        // ---
        let mut state = self.state.write().await;
        if state.session != SessionState::Active {
            debug!("Refusing page load, session is {:?}", state.session);
            return Err(ApiError::SessionExpired);
        }
        Ok(slot(&mut *state).begin(request))
    }

    async fn finish_load<T, F>(
        &self,
        ticket: Ticket,
        result: ApiResult<Page<T>>,
        slot: impl FnOnce(&mut LiveState) -> &mut PageSlot<T, F>,
    ) -> LoadOutcome<T>
    where
        T: Clone,
        F: Clone,
    {
        // ---
        let mut state = self.state.write().await;
        if let Err(ApiError::SessionExpired) = result {
            self.expire(&mut state);
            return LoadOutcome::Failed(ApiError::SessionExpired);
        }
        if state.session != SessionState::Active {
            debug!("Dropping page response after the session ended");
            return LoadOutcome::Superseded;
        }

        let outcome = slot(&mut *state).complete(ticket, result);
        match &outcome {
            LoadOutcome::Superseded => debug!("Dropping response for a superseded request"),
            LoadOutcome::Fresh(page) => {
                debug!(
                    "Page {} applied ({} of {} elements)",
                    page.page,
                    page.content.len(),
                    page.total_elements
                );
                self.publish(state.session);
            }
            LoadOutcome::Stale { error, .. } | LoadOutcome::Failed(error) => {
                warn!("Page load failed: {}", error);
                self.publish(state.session);
            }
        }
        outcome
    }

    /// Load one page of alerts, replacing the cached page on success.
    pub async fn load_alerts(&self, filter: AlertFilter, page: u32, size: u32) -> LoadOutcome<Alert> {
        // ---
        let request = PageRequest::new(filter, page, size);
        let ticket = match self.begin_load(request.clone(), |s| &mut s.alerts).await {
            Ok(ticket) => ticket,
            Err(e) => return LoadOutcome::Failed(e),
        };
        let result = self.service.list_alerts(&request).await;
        self.finish_load(ticket, result, |s| &mut s.alerts).await
    }

    /// Re-issue the most recent alert request. `None` if none was ever made.
    pub async fn refetch_alerts(&self) -> Option<LoadOutcome<Alert>> {
        // ---
        let request = self.state.read().await.alerts.latest_request().cloned()?;
        Some(self.load_alerts(request.filter, request.page, request.size).await)
    }

    pub async fn load_nodes(&self, page: u32, size: u32) -> LoadOutcome<SensorNode> {
        // ---
        let request = PageRequest::new((), page, size);
        let ticket = match self.begin_load(request.clone(), |s| &mut s.nodes).await {
            Ok(ticket) => ticket,
            Err(e) => return LoadOutcome::Failed(e),
        };
        let result = self.service.list_nodes(&request).await;
        self.finish_load(ticket, result, |s| &mut s.nodes).await
    }

    pub async fn load_thresholds(&self, page: u32, size: u32) -> LoadOutcome<Threshold> {
        // ---
        let request = PageRequest::new((), page, size);
        let ticket = match self.begin_load(request.clone(), |s| &mut s.thresholds).await {
            Ok(ticket) => ticket,
            Err(e) => return LoadOutcome::Failed(e),
        };
        let result = self.service.list_thresholds(&request).await;
        self.finish_load(ticket, result, |s| &mut s.thresholds).await
    }

    /// Fetch readings and merge each through the timestamp gate.
    pub async fn load_readings(&self, filter: &ReadingFilter) -> ApiResult<Vec<SensorReading>> {
        // ---
        self.ensure_active().await?;
        let result = self.service.list_readings(filter).await;
        self.observe(&result).await;
        let readings = result?;

        let mut state = self.state.write().await;
        if state.session != SessionState::Active {
            return Ok(readings);
        }
        let mut changed = false;
        for r in &readings {
            changed |= state.readings.upsert(r.clone());
        }
        if changed {
            self.publish(state.session);
        }
        debug!("Merged {} fetched readings", readings.len());
        Ok(readings)
    }

    /// Fetch the full link set. A topology push that lands while the fetch
    /// is in flight is newer and wins; so does a later fetch.
    pub async fn load_topology(&self) -> ApiResult<Vec<NetworkLink>> {
        // ---
        let (ticket, pushes_seen) = {
            let mut state = self.state.write().await;
            if state.session != SessionState::Active {
                return Err(ApiError::SessionExpired);
            }
            state.topology_fetches += 1;
            (state.topology_fetches, state.topology_pushes)
        };

        let result = self.service.get_topology().await;
        self.observe(&result).await;
        let links = result?;

        let mut state = self.state.write().await;
        if state.session == SessionState::Active
            && state.topology_fetches == ticket
            && state.topology_pushes == pushes_seen
        {
            state.links = links;
            self.publish(state.session);
        } else {
            debug!("Topology fetch overtaken, keeping newer link set");
        }
        Ok(state.links.clone())
    }

    // --- push

    /// Merge one push event. Returns `true` if the view changed.
    pub async fn apply_push_event(&self, event: PushEvent) -> bool {
        // ---
        let mut state = self.state.write().await;
        if state.session != SessionState::Active {
            debug!("Ignoring push event outside an active session");
            return false;
        }

        let changed = match event {
            PushEvent::Reading(reading) => state.readings.upsert(reading),
            PushEvent::Alert(alert) => {
                debug!("Alert {} pushed ({:?})", alert.alert_id, alert.level);
                state.push_alert(alert, self.policy.alert_buffer_cap)
            }
            PushEvent::Topology(links) => {
                debug!("Topology snapshot pushed ({} links)", links.len());
                state.links = links;
                state.topology_pushes += 1;
                true
            }
        };

        if changed {
            self.publish(state.session);
        }
        changed
    }

    /// Drain push events until the sender side closes.
    pub async fn run_push_loop(&self, mut events: mpsc::Receiver<PushEvent>) {
        // ---
        while let Some(event) = events.recv().await {
            self.apply_push_event(event).await;
        }
        debug!("Push event stream ended");
    }

    // --- mutations

    /// Acknowledge an alert on behalf of `user_id`.
    ///
    /// Nothing changes locally until the server confirms. On success the
    /// alert is patched in place, or removed from the page when the page
    /// shows pending alerts only.
    pub async fn acknowledge(&self, alert_id: AlertId, user_id: UserId) -> ApiResult<AckOutcome> {
        // ---
        self.ensure_active().await?;
        if self.state.read().await.is_known_acknowledged(alert_id) {
            debug!("Alert {} already acknowledged, skipping", alert_id);
            return Ok(AckOutcome::AlreadyAcknowledged);
        }

        let result = self.service.acknowledge_alert(alert_id, user_id).await;
        let mut state = self.state.write().await;
        let confirmed = match result {
            Ok(alert) => alert,
            Err(ApiError::SessionExpired) => {
                self.expire(&mut state);
                return Err(ApiError::SessionExpired);
            }
            Err(e) => {
                warn!("Acknowledge of alert {} failed: {}", alert_id, e);
                return Err(e);
            }
        };

        let now = Utc::now();
        let pending_only = state
            .alerts
            .applied_request()
            .is_some_and(|r| r.filter.is_pending_only());

        if let Some(page) = state.alerts.page_mut() {
            if pending_only {
                let before = page.content.len();
                page.content.retain(|a| a.alert_id != alert_id);
                if page.content.len() < before {
                    page.total_elements = page.total_elements.saturating_sub(1);
                }
            } else if let Some(alert) = page.content.iter_mut().find(|a| a.alert_id == alert_id) {
                alert.mark_acknowledged(&confirmed, user_id, now);
            }
        }
        for alert in state.unread.iter_mut().filter(|a| a.alert_id == alert_id) {
            alert.mark_acknowledged(&confirmed, user_id, now);
        }

        info!("Alert {} acknowledged by user {}", alert_id, user_id);
        self.publish(state.session);
        Ok(AckOutcome::Acknowledged)
    }

    pub async fn get_node(&self, node_id: &str) -> ApiResult<SensorNode> {
        // ---
        self.ensure_active().await?;
        let result = self.service.get_node(node_id).await;
        self.observe(&result).await;
        let node = result?;
        self.patch_node(&node).await;
        Ok(node)
    }

    /// Created nodes are not inserted into the cached page; the next load
    /// places them where the server orders them.
    pub async fn create_node(&self, form: &NodeForm) -> ApiResult<SensorNode> {
        // ---
        form.validate()?;
        self.ensure_active().await?;
        let result = self.service.create_node(form).await;
        self.observe(&result).await;
        let node = result?;
        info!("Node {} created", node.node_id);
        Ok(node)
    }

    pub async fn update_node(&self, node_id: &str, form: &NodeForm) -> ApiResult<SensorNode> {
        // ---
        form.validate()?;
        self.ensure_active().await?;
        let result = self.service.update_node(node_id, form).await;
        self.observe(&result).await;
        let node = result?;
        self.patch_node(&node).await;
        info!("Node {} updated", node.node_id);
        Ok(node)
    }

    pub async fn delete_node(&self, node_id: &str) -> ApiResult<()> {
        // ---
        self.ensure_active().await?;
        let result = self.service.delete_node(node_id).await;
        self.observe(&result).await;
        result?;

        let mut state = self.state.write().await;
        if let Some(page) = state.nodes.page_mut() {
            let before = page.content.len();
            page.content.retain(|n| n.node_id != node_id);
            if page.content.len() < before {
                page.total_elements = page.total_elements.saturating_sub(1);
            }
        }
        info!("Node {} deleted", node_id);
        self.publish(state.session);
        Ok(())
    }

    async fn patch_node(&self, node: &SensorNode) {
        // ---
        let mut state = self.state.write().await;
        let cached = state
            .nodes
            .page_mut()
            .and_then(|p| p.content.iter_mut().find(|n| n.node_id == node.node_id));
        if let Some(cached) = cached {
            *cached = node.clone();
            self.publish(state.session);
        }
    }

    pub async fn update_threshold(
        &self,
        threshold_id: ThresholdId,
        form: &ThresholdForm,
    ) -> ApiResult<Threshold> {
        // ---
        form.validate()?;
        self.ensure_active().await?;
        let result = self.service.update_threshold(threshold_id, form).await;
        self.observe(&result).await;
        let threshold = result?;

        let mut state = self.state.write().await;
        let cached = state
            .thresholds
            .page_mut()
            .and_then(|p| p.content.iter_mut().find(|t| t.threshold_id == threshold_id));
        if let Some(cached) = cached {
            *cached = threshold.clone();
            self.publish(state.session);
        }
        info!("Threshold {} updated", threshold_id);
        Ok(threshold)
    }

    pub async fn create_link(&self, form: &LinkForm) -> ApiResult<NetworkLink> {
        // ---
        form.validate()?;
        self.ensure_active().await?;
        let result = self.service.create_link(form).await;
        self.observe(&result).await;
        let link = result?;

        let mut state = self.state.write().await;
        if state.session == SessionState::Active
            && !state.links.iter().any(|l| l.link_id == link.link_id)
        {
            state.links.push(link.clone());
            self.publish(state.session);
        }
        info!(
            "Link {} created ({} <-> {})",
            link.link_id, link.source_node_id, link.target_node_id
        );
        Ok(link)
    }

    // --- readers

    pub async fn alerts_view(&self) -> PageView<Alert> {
        self.state.read().await.alerts.view()
    }

    pub async fn nodes_view(&self) -> PageView<SensorNode> {
        self.state.read().await.nodes.view()
    }

    pub async fn thresholds_view(&self) -> PageView<Threshold> {
        self.state.read().await.thresholds.view()
    }

    pub async fn latest_reading(&self, sensor_id: &str) -> Option<SensorReading> {
        self.state.read().await.readings.latest(sensor_id).cloned()
    }

    pub async fn latest_readings(&self) -> Vec<SensorReading> {
        self.state.read().await.readings.all_latest().cloned().collect()
    }

    /// Recent window for one sensor, oldest first.
    pub async fn recent_readings(&self, sensor_id: &str) -> Vec<SensorReading> {
        self.state.read().await.readings.window(sensor_id)
    }

    pub async fn sensor_stats(&self, sensor_id: &str) -> Result<Stats, StatsError> {
        // ---
        let window = self.recent_readings(sensor_id).await;
        compute_stats(&window, &self.policy.trend)
    }

    pub fn gauge_percent(&self, reading: &SensorReading) -> f64 {
        self.policy.gauge.percent(reading)
    }

    /// Pushed alerts, newest first.
    pub async fn unread_alerts(&self) -> Vec<Alert> {
        self.state.read().await.unread.iter().cloned().collect()
    }

    /// Badge count: pushed alerts still pending.
    pub async fn unread_count(&self) -> usize {
        self.state
            .read()
            .await
            .unread
            .iter()
            .filter(|a| !a.acknowledged)
            .count()
    }

    pub async fn clear_unread(&self) {
        // ---
        let mut state = self.state.write().await;
        if !state.unread.is_empty() {
            state.unread.clear();
            self.publish(state.session);
        }
    }

    pub async fn topology(&self) -> TopologyView {
        // ---
        let state = self.state.read().await;
        TopologyView {
            nodes: topology_nodes(&state.links),
            links: state.links.clone(),
        }
    }
}
