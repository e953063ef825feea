//! Authoritative push-model replication server.
//!
//! Each call to [`ReplicationServer::tick`] runs four strictly ordered
//! phases:
//!
//! 1. **Drain**: read every connection's inbound queue and apply buffered
//!    actions to the [`World`] in sequence order.
//! 2. **Commit**: fold the World's dirty Cards into their snapshots,
//!    advancing each dirty Card's version by one.
//! 3. **Diff**: decide per connection which updates to send. Snapshots are
//!    read-only here, so connections are processed in parallel.
//! 4. **Push**: encode one packet per connection that has anything to say.

mod connection;
mod snapshot;

pub use connection::{ConnectionState, ObserverState};
pub use snapshot::Snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use sf_core::{ActionOutcome, CardId, OwnerId, RejectReason, StateDigest, Version, World};
use tracing::{debug, info, warn};

use self::connection::Connection;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::events::{BusObserver, Event, EventBus, ReplicationEvent};
use crate::link::Endpoint;
use crate::wire::{self, ActionMessage, ActionResult, ClientPacket, ConnectionId, ServerPacket};

/// Counters describing one completed tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub actions_applied: usize,
    pub actions_rejected: usize,
    pub cards_committed: usize,
    pub updates_sent: usize,
    pub packets_sent: usize,
    pub bytes_sent: usize,
}

pub struct ReplicationServer {
    config: ReplicationConfig,
    world: World,
    connections: BTreeMap<ConnectionId, Connection>,
    snapshots: BTreeMap<CardId, Snapshot>,
    tick: u64,
    bus: Option<EventBus>,
    next_connection: u32,
}

impl ReplicationServer {
    pub fn new(world: World, config: ReplicationConfig) -> Self {
        Self {
            config,
            world,
            connections: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            tick: 0,
            bus: None,
            next_connection: 1,
        }
    }

    /// Publishes World notifications and connection events on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.world
            .register_observer(Arc::new(BusObserver::new(bus.clone())));
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Gameplay mutations between ticks go through here; they are picked up
    /// by the next commit phase.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Number of completed ticks.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Accepts a new connection. It stays silent until the client's `Hello`.
    pub fn connect(&mut self, endpoint: Endpoint) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.connections.insert(id, Connection::new(id, endpoint));
        debug!(target: "sf_replication::server", connection = %id, "accepted connection");
        id
    }

    pub fn connection_state(&self, connection: ConnectionId) -> Result<ConnectionState> {
        self.connection(connection).map(|c| c.state)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Acknowledgment state of `connection` for `card`, `None` if nothing
    /// was ever sent.
    pub fn observer_state(
        &self,
        connection: ConnectionId,
        card: CardId,
    ) -> Result<Option<ObserverState>> {
        self.connection(connection).map(|c| c.view(card).copied())
    }

    pub fn snapshot(&self, card: CardId) -> Option<&Snapshot> {
        self.snapshots.get(&card)
    }

    /// Committed version of `card`, `Version::NONE` before its first commit.
    pub fn version(&self, card: CardId) -> Version {
        self.snapshots
            .get(&card)
            .map_or(Version::NONE, Snapshot::version)
    }

    pub fn digest(&self, card: CardId) -> Option<StateDigest> {
        self.snapshots.get(&card).map(Snapshot::digest)
    }

    /// Runs one network tick.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        self.drain_inbound();
        self.apply_actions(&mut report);
        report.cards_committed = self.commit();
        self.diff();
        self.push(&mut report);
        self.drop_finished();

        if report.packets_sent > 0 || report.actions_applied + report.actions_rejected > 0 {
            debug!(
                target: "sf_replication::server",
                tick = report.tick,
                applied = report.actions_applied,
                rejected = report.actions_rejected,
                committed = report.cards_committed,
                updates = report.updates_sent,
                bytes = report.bytes_sent,
                "tick complete"
            );
        }
        report
    }

    // ===== phase 1: drain =====

    fn drain_inbound(&mut self) {
        let manifest = self.world.tags().manifest_digest();
        let mut events = Vec::new();

        for connection in self.connections.values_mut() {
            loop {
                let bytes = match connection.endpoint.try_recv() {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(_) => {
                        connection.state = ConnectionState::Closed;
                        break;
                    }
                };
                let packet = match wire::decode::<ClientPacket>(&bytes) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(
                            target: "sf_replication::server",
                            connection = %connection.id,
                            error = %e,
                            "dropped malformed packet"
                        );
                        continue;
                    }
                };
                if let Some(event) = Self::handle_packet(connection, packet, &manifest) {
                    events.push(event);
                }
                if connection.state == ConnectionState::Refused {
                    break;
                }
            }
        }

        for event in events {
            self.publish(event);
        }
    }

    fn handle_packet(
        connection: &mut Connection,
        packet: ClientPacket,
        manifest: &[u8; 32],
    ) -> Option<ReplicationEvent> {
        match (connection.state, packet) {
            (
                ConnectionState::AwaitingHello,
                ClientPacket::Hello {
                    owner,
                    tag_manifest,
                },
            ) => {
                if &tag_manifest != manifest {
                    warn!(
                        target: "sf_replication::server",
                        connection = %connection.id,
                        %owner,
                        "refused connection: tag manifest mismatch"
                    );
                    connection.state = ConnectionState::Refused;
                    let refusal = ServerPacket::Refused {
                        reason: ReplicationError::TagManifestMismatch.to_string(),
                    };
                    Self::send(connection, &refusal);
                    return Some(ReplicationEvent::Refused {
                        connection: connection.id,
                    });
                }

                connection.owner = Some(owner);
                connection.state = ConnectionState::Ready;
                info!(
                    target: "sf_replication::server",
                    connection = %connection.id,
                    %owner,
                    "connection ready"
                );
                Self::send(
                    connection,
                    &ServerPacket::Welcome {
                        connection: connection.id,
                    },
                );
                Some(ReplicationEvent::Connected {
                    connection: connection.id,
                    owner,
                })
            }
            (ConnectionState::Ready, ClientPacket::Actions(actions)) => {
                connection.enqueue(actions);
                None
            }
            (ConnectionState::Ready, ClientPacket::Ack { card, version }) => {
                connection.acknowledge(card, version);
                None
            }
            (ConnectionState::Ready, ClientPacket::ResyncRequest { card }) => {
                connection.request_resync(card);
                None
            }
            (state, packet) => {
                warn!(
                    target: "sf_replication::server",
                    connection = %connection.id,
                    %state,
                    ?packet,
                    "unexpected packet"
                );
                None
            }
        }
    }

    fn apply_actions(&mut self, report: &mut TickReport) {
        let limit = self.config.max_actions_per_tick;
        for connection in self.connections.values_mut() {
            let Some(owner) = connection.owner.filter(|_| connection.is_ready()) else {
                continue;
            };

            for action in connection.next_actions(limit) {
                let outcome = Self::apply(&mut self.world, owner, &action);
                if outcome.is_applied() {
                    report.actions_applied += 1;
                } else {
                    report.actions_rejected += 1;
                    debug!(
                        target: "sf_replication::server",
                        connection = %connection.id,
                        sequence = action.sequence.0,
                        card = %action.card,
                        ?outcome,
                        "rejected action"
                    );
                }
                connection.results.push(ActionResult {
                    sequence: action.sequence,
                    card: action.card,
                    outcome,
                });
            }
        }
    }

    fn apply(world: &mut World, owner: OwnerId, action: &ActionMessage) -> ActionOutcome {
        match world.card(action.card) {
            None => return ActionOutcome::Rejected(RejectReason::UnknownCard),
            Some(card) if card.owner() != owner => {
                return ActionOutcome::Rejected(RejectReason::NotOwned);
            }
            Some(_) => {}
        }
        world
            .execute(action.card, &action.payload)
            .unwrap_or(ActionOutcome::Rejected(RejectReason::UnknownCard))
    }

    // ===== phase 2: commit =====

    fn commit(&mut self) -> usize {
        let changes = self.world.take_changes();
        for card in &changes.destroyed {
            self.snapshots.remove(card);
        }

        let mut committed = 0;
        for id in &changes.dirty {
            let Some(card) = self.world.card(*id) else {
                continue;
            };
            match self.snapshots.get_mut(id) {
                Some(snapshot) => {
                    if snapshot.commit(card).is_some() {
                        committed += 1;
                    }
                }
                None => {
                    self.snapshots.insert(*id, Snapshot::new(card));
                    committed += 1;
                }
            }
        }
        committed
    }

    // ===== phase 3: diff =====

    fn diff(&mut self) {
        let snapshots = &self.snapshots;
        let tick = self.tick;
        let resend_after = self.config.resend_after_ticks;

        if self.config.parallel_diff {
            self.connections
                .par_iter_mut()
                .for_each(|(_, connection)| connection.diff(snapshots, tick, resend_after));
        } else {
            for connection in self.connections.values_mut() {
                connection.diff(snapshots, tick, resend_after);
            }
        }
    }

    // ===== phase 4: push =====

    fn push(&mut self, report: &mut TickReport) {
        for connection in self.connections.values_mut() {
            let results = std::mem::take(&mut connection.results);
            let updates = std::mem::take(&mut connection.updates);
            if results.is_empty() && updates.is_empty() {
                continue;
            }

            let update_count = updates.len();
            let packet = ServerPacket::Tick {
                tick: self.tick,
                results,
                updates,
            };
            if let Some(bytes) = Self::send(connection, &packet) {
                report.updates_sent += update_count;
                report.packets_sent += 1;
                report.bytes_sent += bytes;
            }
        }
    }

    /// Encodes and queues `packet`. Returns the encoded size, or `None` if
    /// the link is gone.
    fn send(connection: &mut Connection, packet: &ServerPacket) -> Option<usize> {
        let bytes = match wire::encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    target: "sf_replication::server",
                    connection = %connection.id,
                    error = %e,
                    "failed to encode packet"
                );
                return None;
            }
        };
        let len = bytes.len();
        match connection.endpoint.send(bytes) {
            Ok(()) => Some(len),
            Err(_) => {
                connection.state = ConnectionState::Closed;
                None
            }
        }
    }

    fn drop_finished(&mut self) {
        let finished: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| matches!(c.state, ConnectionState::Refused | ConnectionState::Closed))
            .map(|c| c.id)
            .collect();

        for id in finished {
            if let Some(connection) = self.connections.remove(&id) {
                debug!(
                    target: "sf_replication::server",
                    connection = %id,
                    state = %connection.state,
                    "dropped connection"
                );
                if connection.state == ConnectionState::Closed {
                    self.publish(ReplicationEvent::Disconnected { connection: id });
                }
            }
        }
    }

    fn connection(&self, connection: ConnectionId) -> Result<&Connection> {
        self.connections
            .get(&connection)
            .ok_or(ReplicationError::UnknownConnection(connection))
    }

    fn publish(&self, event: ReplicationEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::Replication(event));
        }
    }
}

impl std::fmt::Debug for ReplicationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationServer")
            .field("tick", &self.tick)
            .field("connections", &self.connections.len())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}
