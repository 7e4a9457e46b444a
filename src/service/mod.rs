//! Data Service boundary.
//!
//! The reconciler only ever talks to the backend through [`DataService`].
//! [`HttpDataService`] is the production implementation; tests plug in fakes.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{
    Alert, AlertId, LinkForm, NetworkLink, NodeForm, NodeId, Page, SensorId, SensorNode,
    SensorReading, Threshold, ThresholdForm, ThresholdId, UserId,
};

mod http;

pub use http::HttpDataService;

pub type ApiResult<T> = Result<T, ApiError>;

// ---

/// Alert listing filter. `acknowledged: Some(false)` is the pending-only view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub acknowledged: Option<bool>,
}

impl AlertFilter {
    pub fn all() -> Self {
        Self { acknowledged: None }
    }

    pub fn pending() -> Self {
        Self {
            acknowledged: Some(false),
        }
    }

    pub fn is_pending_only(&self) -> bool {
        self.acknowledged == Some(false)
    }
}

/// Parameters of one paginated listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest<F> {
    pub filter: F,
    pub page: u32,
    pub size: u32,
}

impl<F> PageRequest<F> {
    pub fn new(filter: F, page: u32, size: u32) -> Self {
        Self { filter, page, size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub sensor_id: Option<SensorId>,
    pub node_id: Option<NodeId>,
    pub range: Option<TimeRange>,
}

/// Request/response API of the WSN backend.
///
/// All calls are single-attempt from the caller's point of view. An
/// implementation may retry internally only for the auth refresh.
pub trait DataService: Send + Sync {
    // ---
    fn list_alerts(
        &self,
        request: &PageRequest<AlertFilter>,
    ) -> impl Future<Output = ApiResult<Page<Alert>>> + Send;

    fn acknowledge_alert(
        &self,
        alert_id: AlertId,
        user_id: UserId,
    ) -> impl Future<Output = ApiResult<Alert>> + Send;

    fn list_nodes(
        &self,
        request: &PageRequest<()>,
    ) -> impl Future<Output = ApiResult<Page<SensorNode>>> + Send;

    fn get_node(&self, node_id: &str) -> impl Future<Output = ApiResult<SensorNode>> + Send;

    fn create_node(&self, form: &NodeForm) -> impl Future<Output = ApiResult<SensorNode>> + Send;

    fn update_node(
        &self,
        node_id: &str,
        form: &NodeForm,
    ) -> impl Future<Output = ApiResult<SensorNode>> + Send;

    fn delete_node(&self, node_id: &str) -> impl Future<Output = ApiResult<()>> + Send;

    fn list_readings(
        &self,
        filter: &ReadingFilter,
    ) -> impl Future<Output = ApiResult<Vec<SensorReading>>> + Send;

    fn get_topology(&self) -> impl Future<Output = ApiResult<Vec<NetworkLink>>> + Send;

    fn create_link(&self, form: &LinkForm) -> impl Future<Output = ApiResult<NetworkLink>> + Send;

    fn list_thresholds(
        &self,
        request: &PageRequest<()>,
    ) -> impl Future<Output = ApiResult<Page<Threshold>>> + Send;

    fn update_threshold(
        &self,
        threshold_id: ThresholdId,
        form: &ThresholdForm,
    ) -> impl Future<Output = ApiResult<Threshold>> + Send;
}

/// Shared handles forward to the underlying service, so the push channel and
/// the reconciler can use one client.
impl<T: DataService> DataService for Arc<T> {
    // ---
    fn list_alerts(
        &self,
        request: &PageRequest<AlertFilter>,
    ) -> impl Future<Output = ApiResult<Page<Alert>>> + Send {
        (**self).list_alerts(request)
    }

    fn acknowledge_alert(
        &self,
        alert_id: AlertId,
        user_id: UserId,
    ) -> impl Future<Output = ApiResult<Alert>> + Send {
        (**self).acknowledge_alert(alert_id, user_id)
    }

    fn list_nodes(
        &self,
        request: &PageRequest<()>,
    ) -> impl Future<Output = ApiResult<Page<SensorNode>>> + Send {
        (**self).list_nodes(request)
    }

    fn get_node(&self, node_id: &str) -> impl Future<Output = ApiResult<SensorNode>> + Send {
        (**self).get_node(node_id)
    }

    fn create_node(&self, form: &NodeForm) -> impl Future<Output = ApiResult<SensorNode>> + Send {
        (**self).create_node(form)
    }

    fn update_node(
        &self,
        node_id: &str,
        form: &NodeForm,
    ) -> impl Future<Output = ApiResult<SensorNode>> + Send {
        (**self).update_node(node_id, form)
    }

    fn delete_node(&self, node_id: &str) -> impl Future<Output = ApiResult<()>> + Send {
        (**self).delete_node(node_id)
    }

    fn list_readings(
        &self,
        filter: &ReadingFilter,
    ) -> impl Future<Output = ApiResult<Vec<SensorReading>>> + Send {
        (**self).list_readings(filter)
    }

    fn get_topology(&self) -> impl Future<Output = ApiResult<Vec<NetworkLink>>> + Send {
        (**self).get_topology()
    }

    fn create_link(&self, form: &LinkForm) -> impl Future<Output = ApiResult<NetworkLink>> + Send {
        (**self).create_link(form)
    }

    fn list_thresholds(
        &self,
        request: &PageRequest<()>,
    ) -> impl Future<Output = ApiResult<Page<Threshold>>> + Send {
        (**self).list_thresholds(request)
    }

    fn update_threshold(
        &self,
        threshold_id: ThresholdId,
        form: &ThresholdForm,
    ) -> impl Future<Output = ApiResult<Threshold>> + Send {
        (**self).update_threshold(threshold_id, form)
    }
}
