//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so every
//! subscriber receives every message without any single subscriber blocking
//! the others. Publishing is synchronous, which matters here: the Safety
//! Gate announces latch trips from inside its own lock without awaiting.
//!
//! # Topics
//!
//! Traffic is partitioned into three [`Topic`] lanes:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Alarms`] | Alarm lifecycle: fired, skipped, auto-off |
//! | [`Topic::Motors`] | Channel enable/disable/duty transitions |
//! | [`Topic::SystemAlerts`] | Latch trips and clears, operational faults |

use belfry_types::{BelfryError, Event};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Alarm lifecycle events published by the scheduler loop.
    Alarms,
    /// Motor channel state transitions published by the Safety Gate.
    Motors,
    /// Critical events: STOP latch trips/clears and operational faults.
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply; all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    alarms: broadcast::Sender<Event>,
    motors: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` is applied to every topic channel
    /// independently.
    pub fn new(capacity: usize) -> Self {
        let (alarms, _) = broadcast::channel(capacity);
        let (motors, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            alarms,
            motors,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// No subscribers is a normal condition, not an error: `Ok(0)`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, BelfryError> {
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => Ok(0),
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Alarms => &self.alarms,
            Topic::Motors => &self.motors,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Lagged subscribers skip the dropped messages and keep receiving;
    /// `None` means the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_types::{ClockId, EventPayload};

    fn latch_event() -> Event {
        Event::new(
            "belfry-kernel::gate",
            EventPayload::StopLatched {
                source: "button".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SystemAlerts);
        bus.publish_to(Topic::SystemAlerts, latch_event()).unwrap();
        let got = rx.recv().await.expect("event");
        assert!(matches!(got.payload, EventPayload::StopLatched { .. }));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let mut motors = bus.subscribe_to(Topic::Motors);

        bus.publish_to(
            Topic::Motors,
            Event::new(
                "belfry-kernel::gate",
                EventPayload::MotorCommand {
                    clock_id: ClockId::One,
                    enabled: true,
                    duty: 100,
                },
            ),
        )
        .unwrap();

        assert!(motors.try_recv().is_some());
        assert!(alerts.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        let n = bus.publish_to(Topic::Alarms, latch_event()).unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn clones_share_channels() {
        let bus = EventBus::default();
        let clone = bus.clone();
        let mut rx = clone.subscribe_to(Topic::SystemAlerts);
        bus.publish_to(Topic::SystemAlerts, latch_event()).unwrap();
        assert!(rx.try_recv().is_some());
    }
}
