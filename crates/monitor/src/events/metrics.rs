//! Process-wide counters and accumulated durations.
//!
//! Every mutation happens under the store lock and publishes the full snapshot
//! before the lock is released, so subscribers observe exactly one
//! `metrics_update` per change and never a change without its update.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::MonitorError,
    events::bus::{EventBus, MonitorEvent},
};

pub const FRAMES_PROCESSED: &str = "frames_processed";
pub const PEOPLE_DETECTED: &str = "people_detected_today";
pub const FALLS_BOX: &str = "falls_box";
pub const FALLS_POSE: &str = "falls_pose";
pub const FALLS_BOTTOM: &str = "falls_bottom";
pub const FALLS_FULL: &str = "falls_full";
pub const FALL_ALARMS: &str = "fall_alarms";
pub const RECORD_TRIGGERS: &str = "record_triggers_today";
pub const CSV_ROWS_WRITTEN: &str = "csv_rows_written";
pub const HTTP_API_CALLS: &str = "http_api_calls";
/// Live-update and preview stream connections opened by viewers.
pub const STREAM_CONNECTIONS: &str = "stream_connections";

const DEFAULT_COUNTERS: &[&str] = &[
    FRAMES_PROCESSED,
    PEOPLE_DETECTED,
    FALLS_BOX,
    FALLS_POSE,
    FALLS_BOTTOM,
    FALLS_FULL,
    FALL_ALARMS,
    "stream_frozen_count",
    "stream_offline_count",
    RECORD_TRIGGERS,
    CSV_ROWS_WRITTEN,
    HTTP_API_CALLS,
    STREAM_CONNECTIONS,
];

const DEFAULT_DURATIONS: &[&str] = &[
    "stream_live_seconds",
    "stream_frozen_seconds",
    "stream_offline_seconds",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Seconds(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Count(n) => n as f64,
            MetricValue::Seconds(s) => s,
        }
    }
}

pub type MetricsSnapshot = BTreeMap<String, MetricValue>;

#[derive(Debug)]
pub struct MetricsStore {
    values: Mutex<MetricsSnapshot>,
    bus: Arc<EventBus>,
}

impl MetricsStore {
    /// New store seeded with the known counters at zero.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_values(bus, default_values())
    }

    fn with_values(bus: Arc<EventBus>, values: MetricsSnapshot) -> Self {
        Self {
            values: Mutex::new(values),
            bus,
        }
    }

    /// Restore a snapshot written by [`MetricsStore::persist`]. A missing file
    /// yields a fresh store.
    pub fn load(bus: Arc<EventBus>, path: &Path) -> Result<Self, MonitorError> {
        let mut values = default_values();
        if path.is_file() {
            let bytes = fs::read(path)?;
            let restored: MetricsSnapshot = serde_json::from_slice(&bytes)?;
            debug!(
                "restored {} metric(s) from {}",
                restored.len(),
                path.display()
            );
            values.extend(restored);
        }
        Ok(Self::with_values(bus, values))
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        self.mutate(name, |current| match current {
            Some(MetricValue::Seconds(s)) => MetricValue::Seconds(s + amount as f64),
            Some(MetricValue::Count(n)) => MetricValue::Count(n.saturating_add(amount)),
            None => MetricValue::Count(amount),
        });
        ::metrics::counter!("robowatch_counter_total", "metric" => name.to_string())
            .increment(amount);
    }

    pub fn add_seconds(&self, name: &str, seconds: f64) {
        if !(seconds > 0.0) {
            return;
        }
        self.mutate(name, |current| {
            MetricValue::Seconds(current.map(|v| v.as_f64()).unwrap_or(0.0) + seconds)
        });
        ::metrics::gauge!("robowatch_seconds_total", "metric" => name.to_string())
            .increment(seconds);
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.lock().ok()?.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        match self.values.lock() {
            Ok(values) => values.clone(),
            Err(_) => MetricsSnapshot::new(),
        }
    }

    /// Write the current snapshot as JSON, replacing `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<(), MonitorError> {
        let snapshot = self.snapshot();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, &snapshot)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    fn mutate(&self, name: &str, apply: impl FnOnce(Option<MetricValue>) -> MetricValue) {
        let Ok(mut values) = self.values.lock() else {
            warn!("metrics lock poisoned; dropping update to {name}");
            return;
        };
        let next = apply(values.get(name).copied());
        values.insert(name.to_string(), next);
        self.bus.publish(MonitorEvent::MetricsUpdate(values.clone()));
    }
}

fn default_values() -> MetricsSnapshot {
    DEFAULT_COUNTERS
        .iter()
        .map(|name| (name.to_string(), MetricValue::Count(0)))
        .chain(
            DEFAULT_DURATIONS
                .iter()
                .map(|name| (name.to_string(), MetricValue::Seconds(0.0))),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_mutation_broadcasts_exactly_one_snapshot() {
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        let store = MetricsStore::new(bus.clone());

        store.increment(FALLS_BOX);
        store.increment_by(FRAMES_PROCESSED, 3);
        store.add_seconds("stream_live_seconds", 2.0);

        let updates = events.drain();
        assert_eq!(updates.len(), 3);
        let MonitorEvent::MetricsUpdate(last) = &*updates[2] else {
            panic!("expected a metrics update");
        };
        assert_eq!(last.get(FALLS_BOX), Some(&MetricValue::Count(1)));
        assert_eq!(last.get(FRAMES_PROCESSED), Some(&MetricValue::Count(3)));
        assert_eq!(
            last.get("stream_live_seconds"),
            Some(&MetricValue::Seconds(2.0))
        );
    }

    #[test]
    fn no_op_mutations_do_not_broadcast() {
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        let store = MetricsStore::new(bus.clone());
        store.increment_by(FALLS_POSE, 0);
        store.add_seconds("stream_live_seconds", 0.0);
        assert!(events.drain().is_empty());
        assert_eq!(store.get(FALLS_POSE), Some(MetricValue::Count(0)));
    }

    #[test]
    fn unknown_names_are_created_on_first_use() {
        let store = MetricsStore::new(Arc::new(EventBus::new()));
        assert_eq!(store.get("operator_overrides"), None);
        store.increment("operator_overrides");
        assert_eq!(
            store.get("operator_overrides"),
            Some(MetricValue::Count(1))
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let bus = Arc::new(EventBus::new());
        let mut events = bus.subscribe();
        let store = Arc::new(MetricsStore::new(bus.clone()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment(FRAMES_PROCESSED);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get(FRAMES_PROCESSED), Some(MetricValue::Count(1000)));

        let counts: Vec<f64> = events
            .drain()
            .iter()
            .filter_map(|event| match &**event {
                MonitorEvent::MetricsUpdate(s) => s.get(FRAMES_PROCESSED).map(|v| v.as_f64()),
                _ => None,
            })
            .collect();
        assert_eq!(counts.len(), 1000);
        assert!(counts.windows(2).all(|w| w[1] == w[0] + 1.0));
    }

    #[test]
    fn persisted_snapshots_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = MetricsStore::new(Arc::new(EventBus::new()));
        store.increment_by(FALLS_FULL, 4);
        store.add_seconds("stream_offline_seconds", 1.5);
        store.persist(&path).unwrap();

        let restored = MetricsStore::load(Arc::new(EventBus::new()), &path).unwrap();
        assert_eq!(restored.snapshot(), store.snapshot());
    }

    #[test]
    fn loading_a_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            MetricsStore::load(Arc::new(EventBus::new()), &dir.path().join("none.json")).unwrap();
        assert_eq!(store.get(FALLS_BOX), Some(MetricValue::Count(0)));
        assert_eq!(store.get(HTTP_API_CALLS), Some(MetricValue::Count(0)));
        assert_eq!(
            store.get("stream_frozen_seconds"),
            Some(MetricValue::Seconds(0.0))
        );
    }
}
