//! Per-connection handshake, inbound action queue and acknowledgment state.

use std::collections::BTreeMap;

use sf_core::{CardId, CardUpdate, OwnerId, Sequence, Version};
use tracing::{debug, trace, warn};

use super::snapshot::Snapshot;
use crate::link::Endpoint;
use crate::wire::{ActionMessage, ActionResult, ConnectionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Connected; nothing but `Hello` is accepted.
    AwaitingHello,
    Ready,
    /// Handshake failed. Removed at the end of the tick.
    Refused,
    /// The link dropped. Removed at the end of the tick.
    Closed,
}

/// What one connection holds of one Card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObserverState {
    /// Highest version the client acknowledged.
    pub acked: Version,
    /// Highest version sent to the client.
    pub sent: Version,
    /// Tick of the last send, for the resend window.
    pub sent_tick: u64,
    /// The client has no usable view; only a `Full` update helps.
    pub needs_full: bool,
}

impl ObserverState {
    fn fresh() -> Self {
        Self {
            needs_full: true,
            ..Self::default()
        }
    }

    /// Decides what, if anything, to send for a Card at `snapshot`.
    fn next_update(
        &mut self,
        snapshot: &Snapshot,
        tick: u64,
        resend_after: u64,
    ) -> Option<CardUpdate> {
        let version = snapshot.version();
        let resend_due = tick.saturating_sub(self.sent_tick) >= resend_after;

        let update = if self.needs_full {
            if self.sent == version && !resend_due {
                return None;
            }
            snapshot.full()
        } else if version > self.sent {
            snapshot.delta_since(self.acked)
        } else if self.sent > self.acked && resend_due {
            snapshot.delta_since(self.acked)
        } else {
            return None;
        };

        self.sent = version;
        self.sent_tick = tick;
        Some(update)
    }

    /// Records an acknowledgment. Versions outside `(acked, sent]` are
    /// ignored and reported as `false`.
    fn acknowledge(&mut self, version: Version) -> bool {
        if version <= self.acked || version > self.sent {
            return false;
        }
        self.acked = version;
        self.needs_full = false;
        true
    }

    fn reset(&mut self) {
        *self = Self::fresh();
    }
}

pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) endpoint: Endpoint,
    pub(crate) state: ConnectionState,
    pub(crate) owner: Option<OwnerId>,
    views: BTreeMap<CardId, ObserverState>,
    last_sequence: Sequence,
    inbox: BTreeMap<Sequence, ActionMessage>,
    pub(crate) results: Vec<ActionResult>,
    pub(crate) updates: Vec<CardUpdate>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, endpoint: Endpoint) -> Self {
        Self {
            id,
            endpoint,
            state: ConnectionState::AwaitingHello,
            owner: None,
            views: BTreeMap::new(),
            last_sequence: Sequence::ZERO,
            inbox: BTreeMap::new(),
            results: Vec::new(),
            updates: Vec::new(),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub(crate) fn view(&self, card: CardId) -> Option<&ObserverState> {
        self.views.get(&card)
    }

    /// Buffers actions, dropping sequences at or below the last applied one
    /// and duplicates of already buffered ones.
    pub(crate) fn enqueue(&mut self, actions: Vec<ActionMessage>) {
        for action in actions {
            if action.sequence <= self.last_sequence || self.inbox.contains_key(&action.sequence) {
                debug!(
                    target: "sf_replication::server",
                    connection = %self.id,
                    sequence = action.sequence.0,
                    "dropped duplicate or regressed action"
                );
                continue;
            }
            self.inbox.insert(action.sequence, action);
        }
    }

    /// Removes up to `limit` buffered actions in increasing sequence order.
    pub(crate) fn next_actions(&mut self, limit: usize) -> Vec<ActionMessage> {
        let mut batch = Vec::with_capacity(limit.min(self.inbox.len()));
        while batch.len() < limit {
            let Some((sequence, action)) = self.inbox.pop_first() else {
                break;
            };
            self.last_sequence = sequence;
            batch.push(action);
        }
        batch
    }

    pub(crate) fn pending_actions(&self) -> usize {
        self.inbox.len()
    }

    pub(crate) fn acknowledge(&mut self, card: CardId, version: Version) {
        let accepted = self
            .views
            .get_mut(&card)
            .is_some_and(|view| view.acknowledge(version));
        if !accepted {
            trace!(
                target: "sf_replication::server",
                connection = %self.id,
                %card,
                %version,
                "ignored ack outside the unacknowledged window"
            );
        }
    }

    pub(crate) fn request_resync(&mut self, card: CardId) {
        warn!(
            target: "sf_replication::server",
            connection = %self.id,
            %card,
            "client requested resync"
        );
        if let Some(view) = self.views.get_mut(&card) {
            view.reset();
        }
    }

    /// Computes this tick's updates into `self.updates`.
    ///
    /// Reads snapshots only; safe to run for many connections at once.
    pub(crate) fn diff(
        &mut self,
        snapshots: &BTreeMap<CardId, Snapshot>,
        tick: u64,
        resend_after: u64,
    ) {
        if !self.is_ready() {
            return;
        }

        let views = &mut self.views;
        let updates = &mut self.updates;

        views.retain(|card, _| {
            let alive = snapshots.contains_key(card);
            if !alive {
                updates.push(CardUpdate::Destroyed { card: *card });
            }
            alive
        });

        for (card, snapshot) in snapshots {
            let view = views.entry(*card).or_insert_with(ObserverState::fresh);
            match view.next_update(snapshot, tick, resend_after) {
                Some(update) => updates.push(update),
                None => trace!(
                    target: "sf_replication::server",
                    connection = %self.id,
                    %card,
                    version = %snapshot.version(),
                    "suppressed send"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::{CardSpec, Placement, SlotableSpec, StatTable, TagRegistry, World};
    use std::sync::Arc;

    fn snapshot_with_history() -> (World, CardId, Snapshot) {
        let tags = Arc::new(TagRegistry::new());
        let kind = tags.register("Slotable.Test").unwrap();
        let mut world = World::new(tags, StatTable::default());
        let card = world.create_card(OwnerId(1), CardSpec::fixed(2));
        let mut snapshot = Snapshot::new(world.card(card).unwrap());
        world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();
        snapshot.commit(world.card(card).unwrap());
        (world, card, snapshot)
    }

    #[test]
    fn first_send_is_full_and_ack_switches_to_deltas() {
        let (_, _, snapshot) = snapshot_with_history();
        let mut view = ObserverState::fresh();

        let update = view.next_update(&snapshot, 1, 8).unwrap();
        assert!(matches!(update, CardUpdate::Full { .. }));
        assert!(view.next_update(&snapshot, 2, 8).is_none());

        assert!(view.acknowledge(Version(2)));
        assert!(!view.needs_full);
        assert!(view.next_update(&snapshot, 3, 8).is_none());
        assert!(view.next_update(&snapshot, 100, 8).is_none());
    }

    #[test]
    fn unacknowledged_delta_is_resent_after_window() {
        let (mut world, card, mut snapshot) = snapshot_with_history();
        let mut view = ObserverState::fresh();
        view.next_update(&snapshot, 1, 4);
        view.acknowledge(Version(2));

        world.set_locked(card, true).unwrap();
        snapshot.commit(world.card(card).unwrap());

        let Some(CardUpdate::Delta(delta)) = view.next_update(&snapshot, 2, 4) else {
            panic!("expected a delta");
        };
        assert_eq!(delta.base_version, Version(2));
        assert_eq!(delta.version, Version(3));

        assert!(view.next_update(&snapshot, 5, 4).is_none());
        assert!(matches!(
            view.next_update(&snapshot, 6, 4),
            Some(CardUpdate::Delta(_))
        ));
    }

    #[test]
    fn acks_outside_window_are_ignored() {
        let mut view = ObserverState::fresh();
        view.sent = Version(5);
        assert!(!view.acknowledge(Version(6)));
        assert!(view.acknowledge(Version(4)));
        assert!(!view.acknowledge(Version(3)));
        assert_eq!(view.acked, Version(4));
    }

    #[test]
    fn inbox_orders_and_deduplicates() {
        let (_server, client) = crate::link::link();
        let mut connection = Connection::new(ConnectionId(1), client);
        let action = |n| ActionMessage {
            sequence: Sequence(n),
            card: CardId(1),
            payload: sf_core::ActionPayload::Swap {
                a: sf_core::SlotableId(1),
                b: sf_core::SlotableId(2),
            },
        };

        connection.enqueue(vec![action(3), action(1), action(2), action(2)]);
        let batch = connection.next_actions(2);
        assert_eq!(
            batch.iter().map(|a| a.sequence.0).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(connection.pending_actions(), 1);

        connection.enqueue(vec![action(1)]);
        assert_eq!(connection.pending_actions(), 1);
        assert_eq!(connection.next_actions(8).len(), 1);
    }
}
