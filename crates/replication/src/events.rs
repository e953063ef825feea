//! Topic-based event bus for consumers of World and replication events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sf_core::{
    CardId, OwnerId, Sequence, SlotableEvent, StatChange, Version, WorldObserver,
};
use tokio::sync::broadcast;

use crate::wire::ConnectionId;

/// Topics for event routing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Topic {
    /// Slotable activation/removal and Card destruction
    Lifecycle,
    /// Aggregate changes
    Stats,
    /// Connections, resynchronization and prediction corrections
    Replication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Activated(SlotableEvent),
    Removed(SlotableEvent),
    CardDestroyed { card: CardId, owner: OwnerId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationEvent {
    Connected {
        connection: ConnectionId,
        owner: OwnerId,
    },
    Refused {
        connection: ConnectionId,
    },
    Disconnected {
        connection: ConnectionId,
    },
    /// A delta arrived whose base is newer than the local view.
    SequenceGap {
        card: CardId,
        base: Version,
        local: Version,
    },
    /// An update failed validation; `code` is its error code.
    MalformedUpdate {
        card: CardId,
        code: String,
    },
    ResyncRequested {
        card: CardId,
    },
    /// The predicted view was rolled back and `replayed` actions re-run.
    PredictionCorrected {
        card: CardId,
        last_confirmed: Option<Sequence>,
        replayed: usize,
        dropped: usize,
    },
}

/// Event wrapper that carries the topic and typed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Lifecycle(LifecycleEvent),
    Stats(StatChange),
    Replication(ReplicationEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Lifecycle(_) => Topic::Lifecycle,
            Event::Stats(_) => Topic::Stats,
            Event::Replication(_) => Topic::Replication,
        }
    }
}

#[derive(Debug)]
struct Channels {
    lifecycle: broadcast::Sender<Event>,
    stats: broadcast::Sender<Event>,
    replication: broadcast::Sender<Event>,
}

impl Channels {
    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Lifecycle => &self.lifecycle,
            Topic::Stats => &self.stats,
            Topic::Replication => &self.replication,
        }
    }
}

/// Topic-based event bus
///
/// Allows consumers to subscribe to specific topics and only receive
/// events they care about. Publishing never blocks; events published while
/// nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<Channels>,
}

impl EventBus {
    /// Creates a new event bus with default capacity for each topic
    pub fn new() -> Self {
        Self::with_capacity(crate::ReplicationConfig::DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Creates a new event bus with specified capacity per topic
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: Arc::new(Channels {
                lifecycle: broadcast::channel(capacity).0,
                stats: broadcast::channel(capacity).0,
                replication: broadcast::channel(capacity).0,
            }),
        }
    }

    /// Publish an event to its corresponding topic
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        if self.channels.sender(topic).send(event).is_err() {
            tracing::trace!("No subscribers for topic {:?}", topic);
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels.sender(topic).subscribe()
    }

    /// Subscribe to multiple topics
    pub fn subscribe_multiple(&self, topics: &[Topic]) -> Vec<(Topic, broadcast::Receiver<Event>)> {
        topics
            .iter()
            .map(|&topic| (topic, self.subscribe(topic)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards World notifications onto an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusObserver {
    bus: EventBus,
}

impl BusObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl WorldObserver for BusObserver {
    fn name(&self) -> &'static str {
        "event_bus"
    }

    /// Runs after gameplay observers.
    fn priority(&self) -> i32 {
        100
    }

    fn on_slotable_activated(&self, event: &SlotableEvent) {
        self.bus
            .publish(Event::Lifecycle(LifecycleEvent::Activated(*event)));
    }

    fn on_slotable_removed(&self, event: &SlotableEvent) {
        self.bus
            .publish(Event::Lifecycle(LifecycleEvent::Removed(*event)));
    }

    fn on_stat_changed(&self, change: &StatChange) {
        self.bus.publish(Event::Stats(*change));
    }

    fn on_card_destroyed(&self, card: CardId, owner: OwnerId) {
        self.bus
            .publish(Event::Lifecycle(LifecycleEvent::CardDestroyed { card, owner }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::TagId;

    #[test]
    fn subscribers_only_see_their_topic() {
        let bus = EventBus::with_capacity(8);
        let mut stats = bus.subscribe(Topic::Stats);
        let mut replication = bus.subscribe(Topic::Replication);

        let change = StatChange {
            owner: OwnerId(1),
            stat: TagId(2),
            old: 0,
            new: 5,
        };
        bus.publish(Event::Stats(change));
        bus.publish(Event::Replication(ReplicationEvent::ResyncRequested {
            card: CardId(1),
        }));

        assert_eq!(stats.try_recv().unwrap(), Event::Stats(change));
        assert!(stats.try_recv().is_err());
        assert!(matches!(
            replication.try_recv().unwrap(),
            Event::Replication(ReplicationEvent::ResyncRequested { .. })
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(Event::Lifecycle(LifecycleEvent::CardDestroyed {
            card: CardId(1),
            owner: OwnerId(1),
        }));
    }
}
