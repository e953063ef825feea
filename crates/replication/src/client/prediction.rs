//! Speculative execution of locally issued actions and reconciliation
//! against server results.

use std::collections::{BTreeMap, VecDeque};

use sf_core::{
    ActionOutcome, ActionPayload, Card, CardId, Sequence, StateDigest, apply_action,
};
use tracing::debug;

use crate::error::{ReplicationError, Result};
use crate::wire::ActionResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PredictionStatus {
    /// Sent; no server result yet.
    Pending,
    /// The server agreed with the predicted outcome.
    Confirmed,
    /// The server's outcome differed from the prediction.
    Rejected,
    /// A target Slotable left the Card before confirmation.
    Invalidated,
}

/// One locally predicted action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredictedAction {
    pub sequence: Sequence,
    pub card: CardId,
    pub payload: ActionPayload,
    /// Outcome of the most recent local application.
    pub predicted: ActionOutcome,
    /// Digest of the predicted Card right after this action.
    pub digest: StateDigest,
    pub status: PredictionStatus,
}

/// What a reconciliation pass did to one Card's prediction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Actions that left the pending queue, with their final status.
    pub resolved: Vec<PredictedAction>,
    pub confirmed: usize,
    pub rejected: usize,
    pub invalidated: usize,
    pub replayed: usize,
    /// Highest sequence the server resolved in this pass.
    pub last_confirmed: Option<Sequence>,
    /// The predicted view was rolled back to the confirmed Card.
    pub corrected: bool,
}

#[derive(Debug)]
struct CardPrediction {
    predicted: Card,
    pending: VecDeque<PredictedAction>,
}

/// Per-Card predicted views on top of the confirmed ones.
///
/// A Card has a prediction only while it has pending actions; otherwise its
/// view is the confirmed Card.
#[derive(Debug)]
pub struct Predictor {
    max_pending: usize,
    next_sequence: Sequence,
    cards: BTreeMap<CardId, CardPrediction>,
}

impl Predictor {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            next_sequence: Sequence::ZERO,
            cards: BTreeMap::new(),
        }
    }

    /// Pending actions across all Cards.
    pub fn pending_len(&self) -> usize {
        self.cards.values().map(|c| c.pending.len()).sum()
    }

    pub fn pending(&self, card: CardId) -> impl Iterator<Item = &PredictedAction> {
        self.cards
            .get(&card)
            .into_iter()
            .flat_map(|c| c.pending.iter())
    }

    /// The predicted view of `card`, if it has pending actions.
    pub fn view(&self, card: CardId) -> Option<&Card> {
        self.cards.get(&card).map(|c| &c.predicted)
    }

    /// Applies `payload` on top of the current predicted view (or
    /// `confirmed` when there is none) and records it as pending.
    pub fn predict(&mut self, confirmed: &Card, payload: ActionPayload) -> Result<PredictedAction> {
        if self.pending_len() >= self.max_pending {
            return Err(ReplicationError::PredictionBacklogFull {
                limit: self.max_pending,
            });
        }

        let entry = self
            .cards
            .entry(confirmed.id())
            .or_insert_with(|| CardPrediction {
                predicted: confirmed.clone(),
                pending: VecDeque::new(),
            });

        let predicted = apply_action(&mut entry.predicted, &payload);
        self.next_sequence = self.next_sequence.next();
        let action = PredictedAction {
            sequence: self.next_sequence,
            card: confirmed.id(),
            payload,
            predicted,
            digest: StateDigest::of_card(&entry.predicted),
            status: PredictionStatus::Pending,
        };
        entry.pending.push_back(action);
        Ok(action)
    }

    /// Drops every pending action on `card`. Returns how many were dropped.
    pub fn invalidate_card(&mut self, card: CardId) -> usize {
        self.cards
            .remove(&card)
            .map_or(0, |prediction| prediction.pending.len())
    }

    /// Reconciles `card`'s prediction with the confirmed Card and the
    /// server's results for it.
    ///
    /// The predicted view survives only if every resolved outcome matched
    /// and the confirmed Card equals what was predicted after the last
    /// resolved action. Otherwise the view is rebuilt from `confirmed` by
    /// replaying the remaining pending actions in sequence order.
    ///
    /// Returns `None` if there was nothing to reconcile.
    pub fn reconcile(
        &mut self,
        confirmed: &Card,
        results: &[ActionResult],
        confirmed_changed: bool,
    ) -> Option<Reconciliation> {
        let entry = self.cards.get_mut(&confirmed.id())?;
        let mut report = Reconciliation::default();
        let mut mismatch = false;
        let mut last_digest = None;

        for result in results {
            while let Some(front) = entry.pending.front() {
                if front.sequence > result.sequence {
                    break;
                }
                let Some(mut action) = entry.pending.pop_front() else {
                    break;
                };
                if action.sequence < result.sequence {
                    // the server never answered this one
                    action.status = PredictionStatus::Invalidated;
                    report.invalidated += 1;
                    report.resolved.push(action);
                    mismatch = true;
                    continue;
                }

                if action.predicted == result.outcome {
                    action.status = PredictionStatus::Confirmed;
                    report.confirmed += 1;
                } else {
                    action.status = PredictionStatus::Rejected;
                    report.rejected += 1;
                    mismatch = true;
                }
                last_digest = Some(action.digest);
                report.last_confirmed = Some(action.sequence);
                report.resolved.push(action);
                break;
            }
        }

        let (valid, orphaned): (VecDeque<_>, VecDeque<_>) =
            entry.pending.drain(..).partition(|action| {
                action
                    .payload
                    .targets()
                    .all(|t| confirmed.slotable(t).is_some())
            });
        entry.pending = valid;
        if !orphaned.is_empty() {
            mismatch = true;
            report.invalidated += orphaned.len();
            report.resolved.extend(orphaned.into_iter().map(|mut action| {
                action.status = PredictionStatus::Invalidated;
                action
            }));
        }

        let resolved = report.confirmed + report.rejected;
        if resolved == 0 && report.invalidated == 0 && !confirmed_changed {
            return None;
        }

        let in_step = !mismatch
            && resolved > 0
            && last_digest == Some(StateDigest::of_card(confirmed));

        if !in_step {
            entry.predicted = confirmed.clone();
            for action in entry.pending.iter_mut() {
                action.predicted = apply_action(&mut entry.predicted, &action.payload);
                action.digest = StateDigest::of_card(&entry.predicted);
            }
            report.replayed = entry.pending.len();
            report.corrected = true;
            debug!(
                target: "sf_replication::client",
                card = %confirmed.id(),
                rejected = report.rejected,
                invalidated = report.invalidated,
                replayed = report.replayed,
                "rolled back prediction"
            );
        }

        if entry.pending.is_empty() {
            self.cards.remove(&confirmed.id());
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::{
        CardSpec, OwnerId, Placement, RejectReason, RemoveMode, SlotableId, SlotableSpec, StatTable,
        TagRegistry, World,
    };
    use std::sync::Arc;

    struct Fixture {
        world: World,
        card: CardId,
        a: SlotableId,
        b: SlotableId,
    }

    fn fixture() -> Fixture {
        let tags = Arc::new(TagRegistry::new());
        let kind = tags.register("Slotable.Test").unwrap();
        let mut world = World::new(tags, StatTable::default());
        let card = world.create_card(OwnerId(1), CardSpec::fixed(3));
        let a = world
            .insert(card, SlotableSpec::new(kind).with_charges(2), Placement::Append)
            .unwrap();
        let b = world
            .insert(card, SlotableSpec::new(kind).with_charges(1), Placement::Append)
            .unwrap();
        Fixture { world, card, a, b }
    }

    fn result(action: &PredictedAction, outcome: ActionOutcome) -> ActionResult {
        ActionResult {
            sequence: action.sequence,
            card: action.card,
            outcome,
        }
    }

    #[test]
    fn matching_results_keep_the_predicted_view() {
        let mut f = fixture();
        let mut predictor = Predictor::new(8);
        let confirmed = f.world.card(f.card).unwrap().clone();

        let first = predictor
            .predict(&confirmed, ActionPayload::Activate { slotable: f.a, cost: 1 })
            .unwrap();
        let second = predictor
            .predict(&confirmed, ActionPayload::Activate { slotable: f.b, cost: 1 })
            .unwrap();
        assert_eq!(second.sequence, Sequence(2));

        // the server applies only the first action this tick
        f.world.execute(f.card, &first.payload).unwrap();
        let confirmed = f.world.card(f.card).unwrap().clone();
        let predicted_before = predictor.view(f.card).unwrap().clone();

        let report = predictor
            .reconcile(&confirmed, &[result(&first, ActionOutcome::Applied)], true)
            .unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(!report.corrected);
        assert_eq!(predictor.view(f.card), Some(&predicted_before));
        assert_eq!(predictor.pending_len(), 1);

        f.world.execute(f.card, &second.payload).unwrap();
        let confirmed = f.world.card(f.card).unwrap().clone();
        predictor
            .reconcile(&confirmed, &[result(&second, ActionOutcome::Applied)], true)
            .unwrap();
        assert!(predictor.view(f.card).is_none());
    }

    #[test]
    fn rejection_rolls_back_and_replays_later_actions() {
        let mut f = fixture();
        let mut predictor = Predictor::new(8);
        let confirmed = f.world.card(f.card).unwrap().clone();

        let spend = predictor
            .predict(&confirmed, ActionPayload::Activate { slotable: f.b, cost: 1 })
            .unwrap();
        let later = predictor
            .predict(&confirmed, ActionPayload::Activate { slotable: f.a, cost: 1 })
            .unwrap();

        // something else drained b first
        f.world
            .execute(f.card, &ActionPayload::Activate { slotable: f.b, cost: 1 })
            .unwrap();
        let rejected = f.world.execute(f.card, &spend.payload).unwrap();
        assert_eq!(
            rejected,
            ActionOutcome::Rejected(RejectReason::InsufficientCharges)
        );
        let confirmed = f.world.card(f.card).unwrap().clone();

        let report = predictor
            .reconcile(&confirmed, &[result(&spend, rejected)], true)
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.resolved[0].status, PredictionStatus::Rejected);
        assert!(report.corrected);

        let view = predictor.view(f.card).unwrap();
        assert_eq!(view.slotable(f.a).unwrap().context().charges, 1);
        assert_eq!(view.slotable(f.b).unwrap().context().charges, 0);
        assert_eq!(predictor.pending(f.card).next().unwrap().sequence, later.sequence);
    }

    #[test]
    fn actions_on_removed_targets_are_invalidated() {
        let mut f = fixture();
        let mut predictor = Predictor::new(8);
        let confirmed = f.world.card(f.card).unwrap().clone();

        predictor
            .predict(&confirmed, ActionPayload::Recharge { slotable: f.b, amount: 1 })
            .unwrap();
        f.world.remove(f.b, RemoveMode::ClearSlot).unwrap();
        let confirmed = f.world.card(f.card).unwrap().clone();

        let report = predictor.reconcile(&confirmed, &[], true).unwrap();
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.replayed, 0);
        assert_eq!(report.resolved[0].status, PredictionStatus::Invalidated);
        assert!(predictor.view(f.card).is_none());
    }

    #[test]
    fn backlog_is_bounded() {
        let f = fixture();
        let mut predictor = Predictor::new(2);
        let confirmed = f.world.card(f.card).unwrap().clone();
        let payload = ActionPayload::Recharge {
            slotable: f.a,
            amount: 1,
        };

        predictor.predict(&confirmed, payload).unwrap();
        predictor.predict(&confirmed, payload).unwrap();
        assert!(matches!(
            predictor.predict(&confirmed, payload),
            Err(ReplicationError::PredictionBacklogFull { limit: 2 })
        ));
        assert_eq!(predictor.invalidate_card(f.card), 2);
        assert_eq!(predictor.pending_len(), 0);
    }

    #[test]
    fn nothing_to_reconcile_without_results_or_changes() {
        let f = fixture();
        let mut predictor = Predictor::new(4);
        let confirmed = f.world.card(f.card).unwrap().clone();
        predictor
            .predict(&confirmed, ActionPayload::Recharge { slotable: f.a, amount: 1 })
            .unwrap();
        assert!(predictor.reconcile(&confirmed, &[], false).is_none());
        assert_eq!(predictor.pending_len(), 1);
    }
}
