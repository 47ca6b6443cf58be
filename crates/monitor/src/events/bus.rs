//! Ordered fan-out of typed monitor events.
//!
//! Every subscriber owns its own bounded queue, so producers never block and
//! no subscriber can steal an event from another. A subscriber whose queue is
//! full is disconnected. All publishes go through one lock, which gives every
//! subscriber the same total order.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc::{
    self, Receiver, Sender,
    error::{TryRecvError, TrySendError},
};
use tracing::{trace, warn};

use crate::events::metrics::MetricsSnapshot;

/// Events a subscriber may have queued before it is cut off.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    MetricsUpdate(MetricsSnapshot),
    SensorUpdate {
        timestamp: String,
        values: Vec<f64>,
    },
    RobotPositionUpdate {
        x: f64,
        y: f64,
    },
    MapDotUpdate {
        x: f64,
        y: f64,
        class: String,
        timestamp: String,
    },
    ClearMapDots {
        message: String,
    },
}

impl MonitorEvent {
    /// Event name used on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::MetricsUpdate(_) => "metrics_update",
            MonitorEvent::SensorUpdate { .. } => "sensor_update",
            MonitorEvent::RobotPositionUpdate { .. } => "robot_position_update",
            MonitorEvent::MapDotUpdate { .. } => "map_dot_update",
            MonitorEvent::ClearMapDots { .. } => "clear_map_dots",
        }
    }

    /// JSON body carried by the event.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            MonitorEvent::MetricsUpdate(snapshot) => serde_json::to_string(snapshot),
            MonitorEvent::SensorUpdate { timestamp, values } => {
                serde_json::to_string(&json!({ "timestamp": timestamp, "values": values }))
            }
            MonitorEvent::RobotPositionUpdate { x, y } => {
                serde_json::to_string(&json!({ "x": x, "y": y }))
            }
            MonitorEvent::MapDotUpdate {
                x,
                y,
                class,
                timestamp,
            } => serde_json::to_string(&json!({
                "x": x,
                "y": y,
                "class": class,
                "timestamp": timestamp,
            })),
            MonitorEvent::ClearMapDots { message } => {
                serde_json::to_string(&json!({ "message": message }))
            }
        }
    }

    /// Render as one Server-Sent Events frame.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        let payload = self.payload_json()?;
        Ok(format!("event: {}\ndata: {}\n\n", self.event_type(), payload))
    }
}

#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Arc<MonitorEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Copy `event` to every live subscriber and return how many received it.
    ///
    /// Subscribers whose receiving half was dropped, or whose queue is full,
    /// are pruned here.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        let event = Arc::new(event);
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!("event bus lock poisoned; dropping {}", event.event_type());
            return 0;
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "subscriber fell {} events behind; disconnecting it",
                    tx.max_capacity()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        trace!(
            event = event.event_type(),
            subscribers = subscribers.len(),
            "event published"
        );
        subscribers.len()
    }

    pub fn subscribe(&self) -> EventSubscriber {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        EventSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscriber {
    rx: Receiver<Arc<MonitorEvent>>,
}

impl EventSubscriber {
    /// Wait for the next event; `None` once the bus itself is gone.
    pub async fn recv(&mut self) -> Option<Arc<MonitorEvent>> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<MonitorEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Arc<MonitorEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(x: f64) -> MonitorEvent {
        MonitorEvent::RobotPositionUpdate { x, y: 0.0 }
    }

    #[test]
    fn every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for x in 0..3 {
            assert_eq!(bus.publish(position(x as f64)), 2);
        }

        let expected: Vec<MonitorEvent> = (0..3).map(|x| position(x as f64)).collect();
        let seen_first: Vec<MonitorEvent> = first.drain().iter().map(|e| (**e).clone()).collect();
        let seen_second: Vec<MonitorEvent> =
            second.drain().iter().map(|e| (**e).clone()).collect();
        assert_eq!(seen_first, expected);
        assert_eq!(seen_second, expected);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.publish(position(1.0)), 1);
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn a_stalled_subscriber_is_cut_off_without_hurting_others() {
        let bus = EventBus::with_capacity(2);
        let mut stalled = bus.subscribe();
        let mut reader = bus.subscribe();

        assert_eq!(bus.publish(position(0.0)), 2);
        reader.drain();
        assert_eq!(bus.publish(position(1.0)), 2);
        reader.drain();
        assert_eq!(bus.publish(position(2.0)), 1);
        assert_eq!(bus.subscriber_count(), 1);

        assert_eq!(reader.drain().len(), 1);
        // what was queued before the cut-off is still readable
        assert_eq!(stalled.drain().len(), 2);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(position(0.0)), 0);
    }

    #[test]
    fn sse_frames_carry_type_and_payload() {
        let event = MonitorEvent::ClearMapDots {
            message: "new day".into(),
        };
        assert_eq!(
            event.to_sse().unwrap(),
            "event: clear_map_dots\ndata: {\"message\":\"new day\"}\n\n"
        );

        let sensor = MonitorEvent::SensorUpdate {
            timestamp: "2024-01-01 00:00:00".into(),
            values: vec![1.0, 2.5],
        };
        let payload: serde_json::Value =
            serde_json::from_str(&sensor.payload_json().unwrap()).unwrap();
        assert_eq!(payload["values"][1], 2.5);
        assert_eq!(sensor.event_type(), "sensor_update");
    }

    #[tokio::test]
    async fn recv_waits_for_published_events() {
        let bus = Arc::new(EventBus::new());
        let mut subscriber = bus.subscribe();
        let producer = bus.clone();
        std::thread::spawn(move || {
            producer.publish(position(7.0));
        });
        let event = subscriber.recv().await.unwrap();
        assert_eq!(*event, position(7.0));
    }
}
