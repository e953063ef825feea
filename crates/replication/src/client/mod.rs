//! Client session: confirmed Card views, delta application, prediction
//! and resynchronization.

mod prediction;

pub use prediction::{PredictedAction, PredictionStatus, Predictor, Reconciliation};

use std::collections::{BTreeMap, BTreeSet};

use sf_core::{
    ActionPayload, Card, CardId, CardUpdate, DeltaCheck, DeltaError, FrameworkError, OwnerId,
    StatTable, TagId, TagRegistry, Version, aggregate_contributions,
};
use tracing::{debug, info, trace, warn};

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::events::{Event, EventBus, ReplicationEvent};
use crate::link::Endpoint;
use crate::wire::{self, ActionMessage, ActionResult, ClientPacket, ConnectionId, ServerPacket};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// `Hello` sent, waiting for `Welcome`.
    Connecting,
    Ready,
    Refused,
}

/// What one [`ClientSession::poll`] processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub packets: usize,
    pub updates_applied: usize,
    pub stale_ignored: usize,
    pub resyncs_requested: usize,
    pub predictions_confirmed: usize,
    pub predictions_rejected: usize,
    pub corrections: usize,
}

#[derive(Clone, Debug)]
struct ConfirmedView {
    card: Card,
    version: Version,
}

pub struct ClientSession {
    config: ReplicationConfig,
    owner: OwnerId,
    endpoint: Endpoint,
    stat_table: StatTable,
    state: SessionState,
    connection: Option<ConnectionId>,
    views: BTreeMap<CardId, ConfirmedView>,
    resyncing: BTreeSet<CardId>,
    predictor: Predictor,
    bus: Option<EventBus>,
    last_tick: u64,
}

impl ClientSession {
    /// Opens a session for `owner` and sends the handshake.
    pub fn connect(
        owner: OwnerId,
        endpoint: Endpoint,
        tags: &TagRegistry,
        stat_table: StatTable,
        config: ReplicationConfig,
    ) -> Result<Self> {
        let hello = ClientPacket::Hello {
            owner,
            tag_manifest: tags.manifest_digest(),
        };
        endpoint.send(wire::encode(&hello)?)?;

        Ok(Self {
            predictor: Predictor::new(config.max_pending_predictions),
            config,
            owner,
            endpoint,
            stat_table,
            state: SessionState::Connecting,
            connection: None,
            views: BTreeMap::new(),
            resyncing: BTreeSet::new(),
            bus: None,
            last_tick: 0,
        })
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Tick number of the last server packet.
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// What the player sees: the predicted view if actions are pending,
    /// otherwise the confirmed one.
    pub fn view(&self, card: CardId) -> Option<&Card> {
        self.predictor.view(card).or_else(|| self.confirmed(card))
    }

    /// The last server-confirmed state of `card`.
    pub fn confirmed(&self, card: CardId) -> Option<&Card> {
        self.views.get(&card).map(|v| &v.card)
    }

    /// Confirmed version of `card`, `Version::NONE` if there is no view.
    pub fn version(&self, card: CardId) -> Version {
        self.views.get(&card).map_or(Version::NONE, |v| v.version)
    }

    pub fn cards(&self) -> impl Iterator<Item = CardId> + '_ {
        self.views.keys().copied()
    }

    pub fn is_resyncing(&self, card: CardId) -> bool {
        self.resyncing.contains(&card)
    }

    /// `owner`'s value of `stat` across every Card viewed, predictions
    /// included.
    pub fn aggregate(&self, owner: OwnerId, stat: TagId) -> i64 {
        let contributions = self
            .views
            .keys()
            .filter_map(|id| self.view(*id))
            .filter(|card| card.owner() == owner)
            .flat_map(|card| card.slotables().map(|(_, s)| s))
            .filter(|s| s.is_active())
            .filter_map(|s| s.contribution(stat));
        aggregate_contributions(self.stat_table.definition(stat), contributions)
    }

    /// Predicts `payload` on a locally controlled Card and sends it.
    pub fn predict(&mut self, card: CardId, payload: ActionPayload) -> Result<PredictedAction> {
        let view = self
            .views
            .get(&card)
            .ok_or(ReplicationError::UnknownCard(card))?;
        if view.card.owner() != self.owner {
            return Err(ReplicationError::NotLocallyControlled {
                card,
                owner: self.owner,
            });
        }

        let action = self.predictor.predict(&view.card, payload)?;
        self.send(&ClientPacket::Actions(vec![ActionMessage {
            sequence: action.sequence,
            card,
            payload,
        }]))?;
        debug!(
            target: "sf_replication::client",
            %card,
            sequence = action.sequence.0,
            predicted = ?action.predicted,
            "predicted action"
        );
        Ok(action)
    }

    /// Processes every queued server packet.
    pub fn poll(&mut self) -> Result<PollReport> {
        let mut report = PollReport::default();
        while let Some(bytes) = self.endpoint.try_recv()? {
            report.packets += 1;
            match wire::decode::<ServerPacket>(&bytes) {
                Ok(ServerPacket::Welcome { connection }) => {
                    info!(
                        target: "sf_replication::client",
                        %connection,
                        owner = %self.owner,
                        "connected"
                    );
                    self.connection = Some(connection);
                    self.state = SessionState::Ready;
                }
                Ok(ServerPacket::Refused { reason }) => {
                    warn!(target: "sf_replication::client", %reason, "connection refused");
                    self.state = SessionState::Refused;
                    return Err(ReplicationError::TagManifestMismatch);
                }
                Ok(ServerPacket::Tick {
                    tick,
                    results,
                    updates,
                }) => {
                    self.last_tick = tick;
                    self.handle_tick(results, updates, &mut report)?;
                }
                Err(e) => {
                    warn!(target: "sf_replication::client", error = %e, "dropped malformed packet");
                }
            }
        }
        Ok(report)
    }

    fn handle_tick(
        &mut self,
        results: Vec<ActionResult>,
        updates: Vec<CardUpdate>,
        report: &mut PollReport,
    ) -> Result<()> {
        let mut changed = BTreeSet::new();

        for update in updates {
            let card = update.card();
            if let Err(e) = update.validate() {
                self.reject_update(card, &e, report)?;
                continue;
            }
            match update {
                CardUpdate::Full { version, card: full } => {
                    let current = self.version(card);
                    if version <= current && !self.resyncing.contains(&card) {
                        report.stale_ignored += 1;
                        continue;
                    }
                    self.resyncing.remove(&card);
                    self.views.insert(
                        card,
                        ConfirmedView {
                            card: *full,
                            version,
                        },
                    );
                    changed.insert(card);
                    report.updates_applied += 1;
                }
                CardUpdate::Delta(delta) => {
                    if self.resyncing.contains(&card) {
                        trace!(target: "sf_replication::client", %card, "awaiting full update");
                        continue;
                    }
                    let local = self.version(card);
                    match delta.check(local) {
                        DeltaCheck::Stale => {
                            report.stale_ignored += 1;
                        }
                        DeltaCheck::Gap => {
                            warn!(
                                target: "sf_replication::client",
                                %card,
                                base = %delta.base_version,
                                %local,
                                "sequence gap"
                            );
                            self.publish(ReplicationEvent::SequenceGap {
                                card,
                                base: delta.base_version,
                                local,
                            });
                            self.resync(card)?;
                            report.resyncs_requested += 1;
                        }
                        DeltaCheck::Apply => {
                            let Some(view) = self.views.get(&card) else {
                                continue;
                            };
                            let mut next = view.card.clone();
                            let applied = delta.apply_to(&mut next, local).and_then(|()| {
                                if self.config.verify_digests {
                                    delta.verify(&next)
                                } else {
                                    Ok(())
                                }
                            });
                            match applied {
                                Ok(()) => {
                                    self.views.insert(
                                        card,
                                        ConfirmedView {
                                            card: next,
                                            version: delta.version,
                                        },
                                    );
                                    changed.insert(card);
                                    report.updates_applied += 1;
                                }
                                Err(e) => self.reject_update(card, &e, report)?,
                            }
                        }
                    }
                }
                CardUpdate::Destroyed { card } => {
                    debug!(target: "sf_replication::client", %card, "card destroyed");
                    self.views.remove(&card);
                    self.resyncing.remove(&card);
                    self.predictor.invalidate_card(card);
                }
            }
        }

        let mut by_card: BTreeMap<CardId, Vec<ActionResult>> = BTreeMap::new();
        for result in results {
            by_card.entry(result.card).or_default().push(result);
        }
        let touched: BTreeSet<CardId> = by_card.keys().chain(changed.iter()).copied().collect();

        for card in touched {
            let results = by_card.get(&card).map(Vec::as_slice).unwrap_or_default();
            let Some(view) = self.views.get(&card) else {
                continue;
            };
            let Some(outcome) =
                self.predictor
                    .reconcile(&view.card, results, changed.contains(&card))
            else {
                continue;
            };

            report.predictions_confirmed += outcome.confirmed;
            report.predictions_rejected += outcome.rejected;
            if outcome.corrected {
                report.corrections += 1;
                self.publish(ReplicationEvent::PredictionCorrected {
                    card,
                    last_confirmed: outcome.last_confirmed,
                    replayed: outcome.replayed,
                    dropped: outcome.invalidated,
                });
            }
        }

        for card in changed {
            let version = self.version(card);
            self.send(&ClientPacket::Ack { card, version })?;
        }
        Ok(())
    }

    /// Reports an update that cannot be applied and resynchronizes its Card.
    fn reject_update(
        &mut self,
        card: CardId,
        error: &DeltaError,
        report: &mut PollReport,
    ) -> Result<()> {
        warn!(
            target: "sf_replication::client",
            %card,
            error = %error,
            code = error.error_code(),
            "malformed update"
        );
        self.publish(ReplicationEvent::MalformedUpdate {
            card,
            code: error.error_code().to_string(),
        });
        self.resync(card)?;
        report.resyncs_requested += 1;
        Ok(())
    }

    /// Discards the view of `card` and asks the server for a full copy.
    fn resync(&mut self, card: CardId) -> Result<()> {
        self.views.remove(&card);
        let dropped = self.predictor.invalidate_card(card);
        self.resyncing.insert(card);
        warn!(target: "sf_replication::client", %card, dropped, "requesting resync");
        self.publish(ReplicationEvent::ResyncRequested { card });
        if dropped > 0 {
            self.publish(ReplicationEvent::PredictionCorrected {
                card,
                last_confirmed: None,
                replayed: 0,
                dropped,
            });
        }
        self.send(&ClientPacket::ResyncRequest { card })
    }

    fn send(&self, packet: &ClientPacket) -> Result<()> {
        self.endpoint.send(wire::encode(packet)?)
    }

    fn publish(&self, event: ReplicationEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(Event::Replication(event));
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("owner", &self.owner)
            .field("state", &self.state)
            .field("views", &self.views.len())
            .field("pending", &self.predictor.pending_len())
            .finish_non_exhaustive()
    }
}
