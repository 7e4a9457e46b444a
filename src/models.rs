//! Data models for the sensor network backend.
//!
//! Wire JSON is camelCase throughout. Forms carry their own local validation
//! so obviously bad input never costs a round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// ---

pub type NodeId = String;
pub type SensorId = String;
pub type AlertId = i64;
pub type LinkId = i64;
pub type ThresholdId = i64;
pub type UserId = i64;

/// One timestamped measurement. Identified by `(sensor_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    // ---
    pub sensor_id: SensorId,
    pub node_id: NodeId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Only used to pick a gauge scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning")]
    Warning,
    #[serde(alias = "critical")]
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    // ---
    pub alert_id: AlertId,
    pub node_id: NodeId,
    pub sensor_id: SensorId,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<UserId>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alert {
    // ---
    /// `acknowledged` implies both `acknowledged_by` and `acknowledged_at`.
    pub fn is_consistent(&self) -> bool {
        !self.acknowledged || (self.acknowledged_by.is_some() && self.acknowledged_at.is_some())
    }

    /// Apply the one permitted transition, Pending -> Acknowledged.
    ///
    /// `confirmed` is the server's copy of the alert. Its attribution wins,
    /// falling back to `user_id` and `now` if the server omitted either.
    /// An alert that is already acknowledged is left untouched.
    pub fn mark_acknowledged(&mut self, confirmed: &Alert, user_id: UserId, now: DateTime<Utc>) {
        // ---
        if self.acknowledged {
            return;
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(confirmed.acknowledged_by.unwrap_or(user_id));
        self.acknowledged_at = Some(confirmed.acknowledged_at.unwrap_or(now));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorNode {
    // ---
    pub node_id: NodeId,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// A reported signal relationship between two nodes. Undirected by
/// convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLink {
    // ---
    pub link_id: LinkId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    /// 0..=100
    pub signal_strength: u8,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    // ---
    pub threshold_id: ThresholdId,
    pub sensor_type: String,
    pub info: f64,
    pub warning: f64,
    pub danger: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Snapshot result of a paginated listing. `content` keeps server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    // ---
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    #[serde(alias = "number")]
    pub page: u32,
    pub size: u32,
}

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeForm {
    pub name: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub status: NodeStatus,
}

impl NodeForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        // ---
        let mut fields = Vec::new();
        if self.name.trim().is_empty() {
            fields.push(("name".to_string(), "name is required".to_string()));
        }
        if self.location.trim().is_empty() {
            fields.push(("location".to_string(), "location is required".to_string()));
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation("invalid node", fields))
        }
    }
}

/// Threshold boundaries. Must be strictly ordered `info < warning < danger`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdForm {
    pub info: f64,
    pub warning: f64,
    pub danger: f64,
}

impl ThresholdForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        // ---
        let mut fields = Vec::new();
        for (name, v) in [
            ("info", self.info),
            ("warning", self.warning),
            ("danger", self.danger),
        ] {
            if !v.is_finite() {
                fields.push((name.to_string(), format!("{name} must be a finite number")));
            }
        }
        if fields.is_empty() {
            if self.warning <= self.info {
                fields.push((
                    "warning".to_string(),
                    "warning must be greater than info".to_string(),
                ));
            }
            if self.danger <= self.warning {
                fields.push((
                    "danger".to_string(),
                    "danger must be greater than warning".to_string(),
                ));
            }
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation("thresholds out of order", fields))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkForm {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub signal_strength: u8,
}

impl LinkForm {
    pub fn validate(&self) -> Result<(), ApiError> {
        // ---
        let mut fields = Vec::new();
        if self.source_node_id == self.target_node_id {
            fields.push((
                "targetNodeId".to_string(),
                "a link needs two distinct nodes".to_string(),
            ));
        }
        if self.signal_strength > 100 {
            fields.push((
                "signalStrength".to_string(),
                "signal strength must be between 0 and 100".to_string(),
            ));
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation("invalid link", fields))
        }
    }
}
