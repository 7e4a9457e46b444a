//! Summary statistics over an already-loaded reading window.

use serde::Serialize;
use thiserror::Error;

use crate::models::SensorReading;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Trend classification policy. The default threshold of 0.1 is
/// uncalibrated, hence configurable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPolicy {
    pub threshold: f64,
}

impl Default for TrendPolicy {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

impl TrendPolicy {
    pub fn classify(&self, first: f64, last: f64) -> Trend {
        // ---
        let delta = last - first;
        if delta > self.threshold {
            Trend::Up
        } else if delta < -self.threshold {
            Trend::Down
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub trend: Trend,
    pub count: usize,
    pub latest: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("cannot compute statistics over an empty reading window")]
    EmptyWindow,
}

/// Mean, min, max and trend of `readings`, taken in the order given.
///
/// The trend compares the last value against the first.
pub fn compute_stats(readings: &[SensorReading], policy: &TrendPolicy) -> Result<Stats, StatsError> {
    // ---
    let (first, last) = match (readings.first(), readings.last()) {
        (Some(first), Some(last)) => (first.value, last.value),
        _ => return Err(StatsError::EmptyWindow),
    };

    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for r in readings {
        sum += r.value;
        min = min.min(r.value);
        max = max.max(r.value);
    }

    Ok(Stats {
        average: sum / readings.len() as f64,
        min,
        max,
        trend: policy.classify(first, last),
        count: readings.len(),
        latest: last,
    })
}
