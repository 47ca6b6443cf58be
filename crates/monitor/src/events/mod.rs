//! Typed event fan-out and the metrics store that feeds it.

pub mod bus;
pub mod metrics;

pub use bus::{EventBus, EventSubscriber, MonitorEvent};
pub use metrics::{MetricValue, MetricsSnapshot, MetricsStore};
