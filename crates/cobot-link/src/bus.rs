//! Typed, topic-based publish/subscribe event bus.
//!
//! Built on [`tokio::sync::broadcast`] so every subscriber sees every event
//! on its topic and a slow subscriber never blocks a publisher.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Link`] | Connection state changes, inbound text, mode announcements |
//! | [`Topic::Commands`] | Commands written to the robot, and write failures |
//! | [`Topic::Perception`] | Symbolic state changes, per-frame faults |
//! | [`Topic::Alerts`] | Operator-level events (Ctrl-C stop, stale perception) |

use cobot_types::{CobotError, Event, EventPayload};
use tokio::sync::broadcast;
use tracing::warn;

/// Events buffered per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Link,
    Commands,
    Perception,
    Alerts,
}

/// Shared event bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    link: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is applied to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (link, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            link,
            commands,
            perception,
            alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event.
    ///
    /// # Errors
    ///
    /// [`CobotError::Channel`] when nobody is subscribed to `topic`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, CobotError> {
        self.sender(topic)
            .send(event)
            .map_err(|_| CobotError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Fire-and-forget publish of a fresh [`Event`].  Having no subscribers is
    /// normal here and not reported.
    pub fn emit(&self, topic: Topic, source: &str, payload: EventPayload) {
        let _ = self.sender(topic).send(Event::new(source, payload));
    }

    /// Subscribe to one topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Link => &self.link,
            Topic::Commands => &self.commands,
            Topic::Perception => &self.perception,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// Returns `Err(Lagged(n))` when `n` events were dropped for this
    /// subscriber and `Err(Closed)` once every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.  `None` once the bus is
    /// closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll; `None` when nothing is pending.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
