//! Per-principal notification rooms.
//!
//! The lifecycle service never talks to connections directly. It returns
//! [`Outbound`] values with each transition, and [`dispatch`] hands them to a
//! [`NotificationSink`]. [`NotificationHub`] is the live sink: one tokio
//! broadcast channel per topic, created on first subscribe and pruned once
//! its last receiver goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::intent::{Alternative, IntentId};
use crate::domain::principal::{AgentId, UserId};
use crate::domain::transaction::TransactionId;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    User(UserId),
    Agent(AgentId),
}

impl Topic {
    pub fn parse(value: &str) -> Option<Self> {
        let (kind, id) = value.split_once(':')?;
        if id.trim().is_empty() {
            return None;
        }
        match kind {
            "user" => Some(Self::User(UserId(id.to_owned()))),
            "agent" => Some(Self::Agent(AgentId(id.to_owned()))),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid topic `{raw}`")))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationEvent {
    Created {
        intent_id: IntentId,
        amount: i64,
        merchant: String,
        description: String,
        reasoning: Option<String>,
        alternatives: Vec<Alternative>,
    },
    AutoApproved {
        intent_id: IntentId,
        amount: i64,
        merchant: String,
    },
    Approved {
        intent_id: IntentId,
        transaction_id: TransactionId,
        amount: i64,
    },
    Rejected {
        intent_id: IntentId,
        reason: String,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::AutoApproved { .. } => "auto-approved",
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// A notification produced by a transition, not yet delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub topic: Topic,
    pub event: NotificationEvent,
}

impl Outbound {
    pub fn new(topic: Topic, event: NotificationEvent) -> Self {
        Self { topic, event }
    }
}

/// What a subscriber receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivered {
    pub topic: Topic,
    pub event: NotificationEvent,
}

/// Best-effort publisher. Implementations must not block and must not fail
/// the caller; the return value is the number of receivers reached.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, topic: &Topic, event: &NotificationEvent) -> usize;
}

pub fn dispatch(sink: &dyn NotificationSink, notifications: &[Outbound]) -> usize {
    notifications
        .iter()
        .map(|outbound| sink.publish(&outbound.topic, &outbound.event))
        .sum()
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn publish(&self, _topic: &Topic, _event: &NotificationEvent) -> usize {
        0
    }
}

/// Keeps every published notification, for assertions.
#[derive(Clone, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<Outbound>>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<Outbound> {
        match self.published.lock() {
            Ok(published) => published.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn published_to(&self, topic: &Topic) -> Vec<NotificationEvent> {
        self.published()
            .into_iter()
            .filter(|outbound| outbound.topic == *topic)
            .map(|outbound| outbound.event)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, topic: &Topic, event: &NotificationEvent) -> usize {
        let outbound = Outbound::new(topic.clone(), event.clone());
        match self.published.lock() {
            Ok(mut published) => published.push(outbound),
            Err(poisoned) => poisoned.into_inner().push(outbound),
        }
        1
    }
}

#[derive(Debug)]
pub struct NotificationHub {
    rooms: RwLock<HashMap<Topic, broadcast::Sender<Arc<Delivered>>>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), capacity: capacity.max(1) }
    }

    /// Joins `topic`, creating its room when absent.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Arc<Delivered>> {
        let mut rooms = match self.rooms.write() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sender = rooms
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(
            event_name = "notify.room.joined",
            topic = %topic,
            subscribers = sender.receiver_count() + 1,
            "subscriber joined room"
        );
        sender.subscribe()
    }

    pub fn room_count(&self) -> usize {
        match self.rooms.read() {
            Ok(rooms) => rooms.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let rooms = match self.rooms.read() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        rooms.get(topic).map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationHub {
    fn publish(&self, topic: &Topic, event: &NotificationEvent) -> usize {
        let delivered = Arc::new(Delivered { topic: topic.clone(), event: event.clone() });
        let sent = {
            let rooms = match self.rooms.read() {
                Ok(rooms) => rooms,
                Err(poisoned) => poisoned.into_inner(),
            };
            rooms.get(topic).map(|sender| sender.send(Arc::clone(&delivered)))
        };

        match sent {
            Some(Ok(count)) => {
                debug!(
                    event_name = "notify.published",
                    topic = %topic,
                    event_type = event.event_type(),
                    receiver_count = count,
                    "notification published"
                );
                count
            }
            Some(Err(_)) => {
                // Every receiver is gone; drop the room.
                let mut rooms = match self.rooms.write() {
                    Ok(rooms) => rooms,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if rooms.get(topic).is_some_and(|sender| sender.receiver_count() == 0) {
                    rooms.remove(topic);
                }
                trace!(event_name = "notify.dropped", topic = %topic, "room has no subscribers");
                0
            }
            None => {
                trace!(event_name = "notify.dropped", topic = %topic, "no room for topic");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        dispatch, NotificationEvent, NotificationHub, NotificationSink, Outbound, RecordingSink,
        Topic,
    };
    use crate::domain::intent::IntentId;
    use crate::domain::principal::{AgentId, UserId};

    fn rejected(intent: &str) -> NotificationEvent {
        NotificationEvent::Rejected {
            intent_id: IntentId(intent.to_owned()),
            reason: "User rejected".to_owned(),
        }
    }

    #[test]
    fn topic_round_trips_through_text() {
        let topic = Topic::parse("agent:agent-7").expect("valid topic");
        assert_eq!(topic, Topic::Agent(AgentId("agent-7".to_owned())));
        assert_eq!(topic.to_string(), "agent:agent-7");
        assert!(Topic::parse("room:abc").is_none());
        assert!(Topic::parse("user:").is_none());
        assert!(Topic::parse("user-1").is_none());
    }

    #[test]
    fn events_serialize_with_kebab_case_type() {
        let event = NotificationEvent::AutoApproved {
            intent_id: IntentId("intent-1".to_owned()),
            amount: 5_000,
            merchant: "Hilton".to_owned(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "auto-approved");
        assert_eq!(json["intent_id"], "intent-1");
        assert_eq!(json["amount"], 5_000);
    }

    #[tokio::test]
    async fn every_subscriber_of_a_topic_receives_the_event() {
        let hub = NotificationHub::with_capacity(8);
        let topic = Topic::Agent(AgentId("agent-1".to_owned()));
        let mut first = hub.subscribe(&topic);
        let mut second = hub.subscribe(&topic);
        let mut other = hub.subscribe(&Topic::User(UserId("user-1".to_owned())));

        assert_eq!(hub.publish(&topic, &rejected("intent-1")), 2);

        assert_eq!(first.recv().await.expect("first receives").event, rejected("intent-1"));
        assert_eq!(second.recv().await.expect("second receives").topic, topic);
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let hub = NotificationHub::new();
        let topic = Topic::User(UserId("nobody".to_owned()));
        assert_eq!(hub.publish(&topic, &rejected("intent-1")), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn empty_rooms_are_pruned_on_publish() {
        let hub = NotificationHub::new();
        let topic = Topic::User(UserId("user-1".to_owned()));
        let receiver = hub.subscribe(&topic);
        assert_eq!(hub.subscriber_count(&topic), 1);
        drop(receiver);

        assert_eq!(hub.publish(&topic, &rejected("intent-1")), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn dispatch_publishes_every_outbound_in_order() {
        let sink = RecordingSink::default();
        let agent = Topic::Agent(AgentId("agent-1".to_owned()));
        let user = Topic::User(UserId("user-1".to_owned()));

        let reached = dispatch(
            &sink,
            &[
                Outbound::new(agent.clone(), rejected("intent-1")),
                Outbound::new(user.clone(), rejected("intent-2")),
            ],
        );

        assert_eq!(reached, 2);
        assert_eq!(sink.published_to(&agent), vec![rejected("intent-1")]);
        assert_eq!(sink.published()[1].topic, user);
    }
}
