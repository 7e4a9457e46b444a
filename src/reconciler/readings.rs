//! Per-sensor reading store: latest reading plus a bounded recent window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{SensorId, SensorReading};

// ---

#[derive(Debug, Default)]
pub(crate) struct ReadingStore {
    // ---
    latest: BTreeMap<SensorId, SensorReading>,
    windows: BTreeMap<SensorId, BTreeMap<DateTime<Utc>, SensorReading>>,
    capacity: usize,
}

impl ReadingStore {
    // ---
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Merge one reading. Returns `true` if anything visible changed.
    ///
    /// The latest reading only moves forward in time; an older or
    /// same-timestamp reading never replaces the one held. The window keeps
    /// the `capacity` most recent distinct timestamps.
    pub(crate) fn upsert(&mut self, reading: SensorReading) -> bool {
        // ---
        let window_changed = self.insert_into_window(&reading);

        let latest_changed = match self.latest.get(&reading.sensor_id) {
            Some(held) if held.timestamp >= reading.timestamp => false,
            _ => {
                self.latest.insert(reading.sensor_id.clone(), reading);
                true
            }
        };

        window_changed || latest_changed
    }

    fn insert_into_window(&mut self, reading: &SensorReading) -> bool {
        // ---
        if self.capacity == 0 {
            return false;
        }
        let window = self.windows.entry(reading.sensor_id.clone()).or_default();
        if window.contains_key(&reading.timestamp) {
            return false;
        }
        if window.len() >= self.capacity {
            match window.keys().next() {
                Some(oldest) if *oldest > reading.timestamp => return false,
                _ => {}
            }
        }
        window.insert(reading.timestamp, reading.clone());
        while window.len() > self.capacity {
            window.pop_first();
        }
        true
    }

    pub(crate) fn latest(&self, sensor_id: &str) -> Option<&SensorReading> {
        self.latest.get(sensor_id)
    }

    pub(crate) fn all_latest(&self) -> impl Iterator<Item = &SensorReading> {
        self.latest.values()
    }

    /// Window contents in chronological order.
    pub(crate) fn window(&self, sensor_id: &str) -> Vec<SensorReading> {
        self.windows
            .get(sensor_id)
            .map(|w| w.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.latest.clear();
        self.windows.clear();
    }
}
