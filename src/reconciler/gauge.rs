//! Gauge normalization: map a reading onto 0..=100 percent of its scale.

use std::collections::BTreeMap;

use crate::models::SensorReading;

// ---

const FALLBACK_CAP: f64 = 100.0;

/// Percent of `cap` that `value` represents, clamped to 0..=100.
///
/// Non-finite values and non-positive caps read as 0.
pub fn gauge_percent(value: f64, cap: f64) -> f64 {
    // ---
    if !value.is_finite() || !(cap.is_finite() && cap > 0.0) {
        return 0.0;
    }
    (value / cap * 100.0).clamp(0.0, 100.0)
}

/// Full-scale caps per sensor type.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugePolicy {
    caps: BTreeMap<String, f64>,
}

impl Default for GaugePolicy {
    fn default() -> Self {
        // ---
        let caps = [
            ("co2", 10_000.0),
            ("voc", 200.0),
            ("pm25", 100.0),
            ("humidity", 100.0),
            ("temperature", 100.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { caps }
    }
}

impl GaugePolicy {
    // ---
    /// Defaults overlaid with `overrides`.
    pub fn with_caps(overrides: BTreeMap<String, f64>) -> Self {
        let mut policy = Self::default();
        policy.caps.extend(overrides);
        policy
    }

    pub fn caps(&self) -> &BTreeMap<String, f64> {
        &self.caps
    }

    pub fn cap_for(&self, sensor_type: Option<&str>) -> f64 {
        sensor_type
            .and_then(|kind| self.caps.get(&kind.to_lowercase()))
            .copied()
            .unwrap_or(FALLBACK_CAP)
    }

    pub fn percent(&self, reading: &SensorReading) -> f64 {
        gauge_percent(reading.value, self.cap_for(reading.sensor_type.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_gauge_percent_clamps() {
        // ---
        assert_eq!(gauge_percent(50.0, 200.0), 25.0);
        assert_eq!(gauge_percent(250.0, 200.0), 100.0);
        assert_eq!(gauge_percent(-5.0, 200.0), 0.0);
        assert_eq!(gauge_percent(f64::NAN, 200.0), 0.0);
        assert_eq!(gauge_percent(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_cap_lookup() {
        // ---
        let policy = GaugePolicy::default();
        assert_eq!(policy.cap_for(Some("CO2")), 10_000.0);
        assert_eq!(policy.cap_for(Some("voc")), 200.0);
        assert_eq!(policy.cap_for(Some("pressure")), 100.0);
        assert_eq!(policy.cap_for(None), 100.0);
    }

    #[test]
    fn test_overrides_keep_defaults() {
        // ---
        let policy = GaugePolicy::with_caps([("co2".to_string(), 5_000.0)].into_iter().collect());
        assert_eq!(policy.cap_for(Some("co2")), 5_000.0);
        assert_eq!(policy.cap_for(Some("voc")), 200.0);
    }
}
