//! The authoritative World: Cards, their Slotables, and the lifecycle
//! transitions that keep tags and stat aggregates consistent.
//!
//! Every mutation goes through a `World` method. Each one marks the Cards
//! it touched as dirty in an explicit [`ChangeSet`] that the replication
//! layer collects once per tick with [`World::take_changes`].

mod hooks;
mod tags;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

pub use hooks::{ObserverRegistry, SlotableEvent, WorldObserver};

use crate::action::{ActionOutcome, ActionPayload, apply_action};
use crate::config::FrameworkConfig;
use crate::error::{ErrorSeverity, FrameworkError};
use crate::state::{
    Card, CardError, CardId, CardSpec, Lifecycle, OwnerId, Placement, RemoveMode, Slotable,
    SlotableId, SlotableSpec,
};
use crate::stats::{Contribution, Modifier, StatAggregator, StatChange, StatError, StatTable};
use crate::tag::{TagId, TagRegistry};

use tags::TagIndex;

/// Errors raised by World mutations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Card(#[from] CardError),

    #[error(transparent)]
    Stat(#[from] StatError),
}

impl FrameworkError for WorldError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Card(e) => e.severity(),
            Self::Stat(e) => e.severity(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Card(e) => e.error_code(),
            Self::Stat(e) => e.error_code(),
        }
    }
}

/// Cards touched since the last [`World::take_changes`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub dirty: BTreeSet<CardId>,
    pub destroyed: BTreeSet<CardId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.destroyed.is_empty()
    }
}

/// Result of [`World::remove`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { card: CardId, index: usize },
    /// The Slotable had already been removed; nothing happened.
    AlreadyRemoved,
}

pub struct World {
    config: FrameworkConfig,
    tags: Arc<TagRegistry>,
    cards: BTreeMap<CardId, Card>,
    locations: HashMap<SlotableId, CardId>,
    aggregator: StatAggregator,
    tag_index: TagIndex,
    observers: ObserverRegistry,
    changes: ChangeSet,
    next_card: u32,
    next_slotable: u32,
    next_stamp: u64,
}

impl World {
    pub fn new(tags: Arc<TagRegistry>, table: StatTable) -> Self {
        Self::with_config(FrameworkConfig::default(), tags, table)
    }

    pub fn with_config(config: FrameworkConfig, tags: Arc<TagRegistry>, table: StatTable) -> Self {
        Self {
            config,
            tags,
            cards: BTreeMap::new(),
            locations: HashMap::new(),
            aggregator: StatAggregator::new(table),
            tag_index: TagIndex::default(),
            observers: ObserverRegistry::new(),
            changes: ChangeSet::default(),
            next_card: 1,
            next_slotable: 1,
            next_stamp: 1,
        }
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn tags(&self) -> &Arc<TagRegistry> {
        &self.tags
    }

    pub fn stats(&self) -> &StatAggregator {
        &self.aggregator
    }

    pub fn stat_table(&self) -> &StatTable {
        self.aggregator.table()
    }

    pub fn register_observer(&mut self, observer: Arc<dyn WorldObserver>) {
        self.observers.register(observer);
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    // ===== queries =====

    pub fn card(&self, card: CardId) -> Option<&Card> {
        self.cards.get(&card)
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn cards_of(&self, owner: OwnerId) -> impl Iterator<Item = &Card> {
        self.cards.values().filter(move |c| c.owner() == owner)
    }

    /// A live Slotable.
    pub fn slotable(&self, slotable: SlotableId) -> Option<&Slotable> {
        let card = self.locations.get(&slotable)?;
        self.cards.get(card)?.slotable(slotable)
    }

    /// Card currently holding `slotable`.
    pub fn location(&self, slotable: SlotableId) -> Option<CardId> {
        self.locations.get(&slotable).copied()
    }

    /// Lifecycle of any id this World ever allocated; `None` for ids it
    /// never handed out.
    pub fn lifecycle(&self, slotable: SlotableId) -> Option<Lifecycle> {
        if let Some(live) = self.slotable(slotable) {
            return Some(live.lifecycle());
        }
        self.was_allocated(slotable).then_some(Lifecycle::Removed)
    }

    pub fn aggregate(&self, owner: OwnerId, stat: TagId) -> i64 {
        self.aggregator.aggregate(owner, stat)
    }

    /// True if any Active Slotable of `owner` carries exactly `tag`.
    pub fn has_tag(&self, owner: OwnerId, tag: TagId) -> bool {
        self.tag_index.has_tag(owner, tag)
    }

    /// True if any Active Slotable of `owner` carries `prefix` or a
    /// descendant of it.
    pub fn matches_prefix(&self, owner: OwnerId, prefix: TagId) -> bool {
        self.tag_index.matches_prefix(owner, prefix, &self.tags)
    }

    /// Drains the change journal.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    // ===== cards =====

    pub fn create_card(&mut self, owner: OwnerId, spec: CardSpec) -> CardId {
        let id = CardId(self.next_card);
        self.next_card += 1;
        let card = Card::new(id, owner, spec);
        debug!(
            target: "sf_core::world",
            card = %id,
            %owner,
            capacity = card.capacity(),
            growable = card.is_growable(),
            "created card"
        );
        self.cards.insert(id, card);
        self.changes.dirty.insert(id);
        id
    }

    /// Destroys a Card, removing every Slotable it holds.
    ///
    /// Returns the removed Slotables in slot order.
    pub fn destroy_card(&mut self, card: CardId) -> Result<Vec<SlotableId>, WorldError> {
        let mut removed = self.cards.remove(&card).ok_or(CardError::UnknownCard(card))?;
        let owner = removed.owner();

        let ids: Vec<SlotableId> = removed
            .drain()
            .into_iter()
            .map(|slotable| {
                let id = slotable.id();
                self.retire(slotable, card, owner);
                id
            })
            .collect();

        self.changes.dirty.remove(&card);
        self.changes.destroyed.insert(card);
        debug!(target: "sf_core::world", %card, %owner, "destroyed card");
        self.observers.card_destroyed(card, owner);
        Ok(ids)
    }

    pub fn set_locked(&mut self, card: CardId, locked: bool) -> Result<(), WorldError> {
        self.card_mut(card)?.set_locked(locked);
        self.changes.dirty.insert(card);
        Ok(())
    }

    // ===== slotables =====

    /// Creates a Slotable from `spec` and attaches it, making it Active.
    ///
    /// With [`Placement::Replace`] the previous occupant is removed first.
    /// Nothing changes on failure.
    pub fn insert(
        &mut self,
        card: CardId,
        spec: SlotableSpec,
        placement: Placement,
    ) -> Result<SlotableId, WorldError> {
        let (owner, _) = {
            let target = self.card_ref(card)?;
            (target.owner(), target.check_placement(placement)?)
        };
        for (stat, modifier) in &spec.contributions {
            self.check_modifier(*stat, modifier)?;
        }

        let id = SlotableId(self.next_slotable);
        self.next_slotable += 1;
        let mut next_stamp = self.next_stamp;
        let slotable = Slotable::from_spec(id, spec, || {
            let stamp = next_stamp;
            next_stamp += 1;
            stamp
        });
        self.next_stamp = next_stamp;

        let (index, displaced) = self.card_mut(card)?.place(slotable, placement)?;
        if let Some(displaced) = displaced {
            self.retire(displaced, card, owner);
        }
        self.activate(id, card, owner);
        debug!(target: "sf_core::world", slotable = %id, %card, index, "inserted slotable");
        Ok(id)
    }

    /// Removes a Slotable. Removing an already-removed Slotable is a no-op.
    pub fn remove(
        &mut self,
        slotable: SlotableId,
        mode: RemoveMode,
    ) -> Result<RemoveOutcome, WorldError> {
        let Some(card) = self.location(slotable) else {
            if self.was_allocated(slotable) {
                return Ok(RemoveOutcome::AlreadyRemoved);
            }
            return Err(CardError::UnknownSlotable(slotable).into());
        };

        let index = self
            .card_ref(card)?
            .position_of(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?;
        self.remove_at(card, index, mode)?;
        Ok(RemoveOutcome::Removed { card, index })
    }

    /// Removes whatever occupies `index`.
    pub fn remove_at(
        &mut self,
        card: CardId,
        index: usize,
        mode: RemoveMode,
    ) -> Result<SlotableId, WorldError> {
        let target = self.card_mut(card)?;
        let owner = target.owner();
        let slotable = target.take(index, mode)?;
        let id = slotable.id();
        self.retire(slotable, card, owner);
        Ok(id)
    }

    /// Swaps two slots of one Card.
    pub fn swap(&mut self, card: CardId, a: usize, b: usize) -> Result<(), WorldError> {
        self.card_mut(card)?.swap(a, b)?;
        self.changes.dirty.insert(card);
        Ok(())
    }

    /// Exchanges two live Slotables, possibly across Cards of different
    /// owners. Stat contributions follow their Slotable to the new owner.
    pub fn trade(&mut self, a: SlotableId, b: SlotableId) -> Result<(), WorldError> {
        let card_a = self.location(a).ok_or(CardError::UnknownSlotable(a))?;
        let card_b = self.location(b).ok_or(CardError::UnknownSlotable(b))?;

        if card_a == card_b {
            let card = self.card_ref(card_a)?;
            let ia = card.position_of(a).ok_or(CardError::UnknownSlotable(a))?;
            let ib = card.position_of(b).ok_or(CardError::UnknownSlotable(b))?;
            return self.swap(card_a, ia, ib);
        }

        let (ia, owner_a) = self.checked_position(card_a, a)?;
        let (ib, owner_b) = self.checked_position(card_b, b)?;

        let taken_a = self.card_mut(card_a)?.take(ia, RemoveMode::ClearSlot)?;
        let taken_b = self.card_mut(card_b)?.take(ib, RemoveMode::ClearSlot)?;
        self.card_mut(card_a)?.exchange(ia, taken_b);
        self.card_mut(card_b)?.exchange(ib, taken_a);

        self.locations.insert(a, card_b);
        self.locations.insert(b, card_a);
        self.changes.dirty.insert(card_a);
        self.changes.dirty.insert(card_b);

        if owner_a != owner_b {
            let mut changes = self.aggregator.rebind(a, owner_b);
            changes.extend(self.aggregator.rebind(b, owner_a));
            self.move_tags(a, owner_a, owner_b);
            self.move_tags(b, owner_b, owner_a);
            self.observers.stats_changed(&changes);
        }

        debug!(target: "sf_core::world", %a, %b, %card_a, %card_b, "traded slotables");
        Ok(())
    }

    /// Adds or replaces the contribution of an Active Slotable to `stat`.
    pub fn set_contribution(
        &mut self,
        slotable: SlotableId,
        stat: TagId,
        modifier: Modifier,
    ) -> Result<Option<StatChange>, WorldError> {
        let contribution = Contribution::new(modifier, self.next_stamp);
        let change = self
            .aggregator
            .register_contribution(slotable, stat, contribution)?;
        self.next_stamp += 1;

        let card = self.live_mut(slotable)?;
        card.slotable_mut(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?
            .set_contribution(stat, contribution);
        self.touch(slotable);
        self.observers.stats_changed(change.as_slice());
        Ok(change)
    }

    /// Removes the contribution of an Active Slotable to `stat`.
    pub fn clear_contribution(
        &mut self,
        slotable: SlotableId,
        stat: TagId,
    ) -> Result<Option<StatChange>, WorldError> {
        let change = self.aggregator.unregister_contribution(slotable, stat)?;

        let card = self.live_mut(slotable)?;
        let removed = card
            .slotable_mut(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?
            .clear_contribution(stat);
        if removed.is_some() {
            self.touch(slotable);
        }
        self.observers.stats_changed(change.as_slice());
        Ok(change)
    }

    /// Adds a tag to a live Slotable. Returns false if it was already there.
    pub fn grant_tag(&mut self, slotable: SlotableId, tag: TagId) -> Result<bool, WorldError> {
        self.edit_tags(slotable, tag, true)
    }

    /// Removes a tag from a live Slotable. The kind tag cannot be revoked.
    pub fn revoke_tag(&mut self, slotable: SlotableId, tag: TagId) -> Result<bool, WorldError> {
        self.edit_tags(slotable, tag, false)
    }

    /// Applies a predicted-action payload authoritatively.
    pub fn execute(
        &mut self,
        card: CardId,
        payload: &ActionPayload,
    ) -> Result<ActionOutcome, WorldError> {
        let outcome = apply_action(self.card_mut(card)?, payload);
        if outcome.is_applied() {
            self.changes.dirty.insert(card);
        }
        Ok(outcome)
    }

    // ===== internals =====

    fn card_ref(&self, card: CardId) -> Result<&Card, CardError> {
        self.cards.get(&card).ok_or(CardError::UnknownCard(card))
    }

    fn card_mut(&mut self, card: CardId) -> Result<&mut Card, CardError> {
        self.cards.get_mut(&card).ok_or(CardError::UnknownCard(card))
    }

    fn live_mut(&mut self, slotable: SlotableId) -> Result<&mut Card, CardError> {
        let card = self
            .location(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?;
        self.card_mut(card)
    }

    fn was_allocated(&self, slotable: SlotableId) -> bool {
        slotable.0 >= 1 && slotable.0 < self.next_slotable
    }

    fn touch(&mut self, slotable: SlotableId) {
        if let Some(card) = self.location(slotable) {
            self.changes.dirty.insert(card);
        }
    }

    fn check_modifier(&self, stat: TagId, modifier: &Modifier) -> Result<(), StatError> {
        let mode = self.aggregator.table().definition(stat).mode;
        if modifier.is_compatible(mode) {
            Ok(())
        } else {
            Err(StatError::IncompatibleModifier {
                stat,
                mode,
                modifier: *modifier,
            })
        }
    }

    fn checked_position(
        &self,
        card: CardId,
        slotable: SlotableId,
    ) -> Result<(usize, OwnerId), CardError> {
        let target = self.card_ref(card)?;
        if target.is_locked() {
            return Err(CardError::Locked { card });
        }
        let index = target
            .position_of(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?;
        Ok((index, target.owner()))
    }

    /// Pending → Active for a Slotable that was just placed.
    fn activate(&mut self, id: SlotableId, card: CardId, owner: OwnerId) {
        let Some(slotable) = self.cards.get_mut(&card).and_then(|c| c.slotable_mut(id)) else {
            return;
        };
        slotable.transition(Lifecycle::Active);
        let kind = slotable.kind();
        let tags = slotable.tags().clone();
        let contributions: Vec<(TagId, Contribution)> =
            slotable.contributions().map(|(stat, c)| (stat, *c)).collect();

        self.locations.insert(id, card);
        self.aggregator.bind(id, owner);
        let mut changes = Vec::with_capacity(contributions.len());
        for (stat, contribution) in contributions {
            match self.aggregator.register_contribution(id, stat, contribution) {
                Ok(change) => changes.extend(change),
                Err(error) => warn!(
                    target: "sf_core::world",
                    slotable = %id,
                    %stat,
                    %error,
                    "contribution rejected on activation"
                ),
            }
        }
        self.tag_index.add(owner, &tags);
        self.changes.dirty.insert(card);

        let event = SlotableEvent {
            slotable: id,
            kind,
            card,
            owner,
        };
        self.observers.slotable_activated(&event);
        self.observers.stats_changed(&changes);
    }

    /// Active → Removed for a Slotable already taken out of its Card.
    ///
    /// Contributions are torn down before the lifecycle changes, so no
    /// reader ever sees a Removed Slotable in an aggregate.
    fn retire(&mut self, mut slotable: Slotable, card: CardId, owner: OwnerId) {
        let id = slotable.id();
        let changes = self.aggregator.unbind(id);
        if slotable.is_active() {
            self.tag_index.remove(owner, slotable.tags());
        }
        slotable.transition(Lifecycle::Removed);
        self.locations.remove(&id);
        self.changes.dirty.insert(card);

        debug!(target: "sf_core::world", slotable = %id, %card, "removed slotable");
        let event = SlotableEvent {
            slotable: id,
            kind: slotable.kind(),
            card,
            owner,
        };
        self.observers.slotable_removed(&event);
        self.observers.stats_changed(&changes);
    }

    fn move_tags(&mut self, slotable: SlotableId, from: OwnerId, to: OwnerId) {
        if let Some(tags) = self.slotable(slotable).map(|s| s.tags().clone()) {
            self.tag_index.remove(from, &tags);
            self.tag_index.add(to, &tags);
        }
    }

    fn edit_tags(
        &mut self,
        slotable: SlotableId,
        tag: TagId,
        grant: bool,
    ) -> Result<bool, WorldError> {
        let card_id = self
            .location(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?;
        let card = self.card_mut(card_id)?;
        let owner = card.owner();
        let target = card
            .slotable_mut(slotable)
            .ok_or(CardError::UnknownSlotable(slotable))?;

        if !grant && tag == target.kind() {
            return Ok(false);
        }
        let changed = if grant {
            target.tags_mut().insert(tag)
        } else {
            target.tags_mut().remove(tag)
        };
        if changed {
            let delta: crate::tag::TagSet = std::iter::once(tag).collect();
            if grant {
                self.tag_index.add(owner, &delta);
            } else {
                self.tag_index.remove(owner, &delta);
            }
            self.changes.dirty.insert(card_id);
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("cards", &self.cards.len())
            .field("live_slotables", &self.locations.len())
            .field("observers", &self.observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::stats::StatDefinition;

    struct Fixture {
        world: World,
        owner: OwnerId,
        kind: TagId,
        power: TagId,
    }

    fn fixture() -> Fixture {
        let tags = Arc::new(TagRegistry::new());
        let kind = tags.register("Slotable.Weapon.Sword").unwrap();
        let power = tags.register("Stat.Power").unwrap();
        Fixture {
            world: World::new(tags, StatTable::default()),
            owner: OwnerId(7),
            kind,
            power,
        }
    }

    #[test]
    fn insert_activates_and_aggregates() {
        let Fixture {
            mut world,
            owner,
            kind,
            power,
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(3));
        let a = world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(5)),
                Placement::Append,
            )
            .unwrap();
        let b = world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(3)),
                Placement::Append,
            )
            .unwrap();

        assert_eq!(world.aggregate(owner, power), 8);
        assert_eq!(world.lifecycle(a), Some(Lifecycle::Active));

        world.remove(a, RemoveMode::ClearSlot).unwrap();
        assert_eq!(world.aggregate(owner, power), 3);
        assert_eq!(world.lifecycle(a), Some(Lifecycle::Removed));
        assert_eq!(world.lifecycle(b), Some(Lifecycle::Active));
        assert_eq!(world.lifecycle(SlotableId(99)), None);
    }

    #[test]
    fn removal_is_idempotent() {
        let Fixture {
            mut world,
            owner,
            kind,
            ..
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(1));
        let a = world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();

        assert_eq!(
            world.remove(a, RemoveMode::ClearSlot).unwrap(),
            RemoveOutcome::Removed { card, index: 0 }
        );
        assert_eq!(
            world.remove(a, RemoveMode::ClearSlot).unwrap(),
            RemoveOutcome::AlreadyRemoved
        );
        assert!(matches!(
            world.remove(SlotableId(42), RemoveMode::ClearSlot),
            Err(WorldError::Card(CardError::UnknownSlotable(_)))
        ));
    }

    #[test]
    fn replace_retires_previous_occupant() {
        let Fixture {
            mut world,
            owner,
            kind,
            power,
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(1));
        let old = world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(10)),
                Placement::Append,
            )
            .unwrap();
        world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(1)),
                Placement::Replace(0),
            )
            .unwrap();

        assert_eq!(world.lifecycle(old), Some(Lifecycle::Removed));
        assert_eq!(world.aggregate(owner, power), 1);
    }

    #[test]
    fn failed_insert_changes_nothing() {
        let Fixture {
            mut world,
            owner,
            kind,
            ..
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(1));
        world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();
        world.take_changes();

        let err = world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap_err();
        assert!(matches!(
            err,
            WorldError::Card(CardError::CapacityExceeded { .. })
        ));
        assert!(world.take_changes().is_empty());
    }

    #[test]
    fn incompatible_contribution_rejects_insert() {
        let tags = Arc::new(TagRegistry::new());
        let kind = tags.register("Slotable.Rank").unwrap();
        let rank = tags.register("Stat.Rank").unwrap();
        let table = StatTable::default().with(rank, StatDefinition::override_by_priority());
        let mut world = World::new(tags, table);
        let card = world.create_card(OwnerId(1), CardSpec::fixed(1));

        let err = world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(rank, Modifier::Add(1)),
                Placement::Append,
            )
            .unwrap_err();
        assert!(matches!(err, WorldError::Stat(StatError::IncompatibleModifier { .. })));
        assert_eq!(world.card(card).map(Card::occupied), Some(0));
    }

    #[test]
    fn stale_contribution_is_reported_not_applied() {
        let Fixture {
            mut world,
            owner,
            kind,
            power,
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(1));
        let a = world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();
        world.remove(a, RemoveMode::ClearSlot).unwrap();

        let err = world
            .set_contribution(a, power, Modifier::Add(5))
            .unwrap_err();
        assert!(matches!(
            err,
            WorldError::Stat(StatError::StaleContribution { .. })
        ));
        assert!(err.severity().is_recoverable());
        assert_eq!(world.aggregate(owner, power), 0);
    }

    #[test]
    fn destroy_card_cascades() {
        let Fixture {
            mut world,
            owner,
            kind,
            power,
        } = fixture();
        let card = world.create_card(owner, CardSpec::growable(4));
        let ids: Vec<_> = (0..3)
            .map(|_| {
                world
                    .insert(
                        card,
                        SlotableSpec::new(kind).with_contribution(power, Modifier::Add(2)),
                        Placement::Append,
                    )
                    .unwrap()
            })
            .collect();
        assert_eq!(world.aggregate(owner, power), 6);
        assert!(world.has_tag(owner, kind));

        let removed = world.destroy_card(card).unwrap();
        assert_eq!(removed, ids);
        assert_eq!(world.aggregate(owner, power), 0);
        assert!(!world.has_tag(owner, kind));
        assert!(world.card(card).is_none());

        let changes = world.take_changes();
        assert!(changes.destroyed.contains(&card));
        assert!(!changes.dirty.contains(&card));
    }

    #[test]
    fn trade_moves_contributions_between_owners() {
        let Fixture {
            mut world,
            kind,
            power,
            ..
        } = fixture();
        let (alice, bob) = (OwnerId(1), OwnerId(2));
        let card_a = world.create_card(alice, CardSpec::fixed(1));
        let card_b = world.create_card(bob, CardSpec::fixed(1));
        let sword = world
            .insert(
                card_a,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(9)),
                Placement::Append,
            )
            .unwrap();
        let stick = world
            .insert(
                card_b,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(1)),
                Placement::Append,
            )
            .unwrap();

        world.trade(sword, stick).unwrap();
        assert_eq!(world.location(sword), Some(card_b));
        assert_eq!(world.location(stick), Some(card_a));
        assert_eq!(world.aggregate(alice, power), 1);
        assert_eq!(world.aggregate(bob, power), 9);
        assert_eq!(world.slotable(sword).and_then(Slotable::card), Some(card_b));
    }

    #[test]
    fn prefix_queries_follow_active_slotables() {
        let Fixture {
            mut world,
            owner,
            kind,
            ..
        } = fixture();
        let weapon = world.tags().lookup("Slotable.Weapon").unwrap();
        let burning = world.tags().register("Status.Burning").unwrap();
        let card = world.create_card(owner, CardSpec::fixed(1));
        let a = world
            .insert(card, SlotableSpec::new(kind), Placement::Append)
            .unwrap();

        assert!(world.matches_prefix(owner, weapon));
        assert!(!world.has_tag(owner, weapon));

        assert!(world.grant_tag(a, burning).unwrap());
        assert!(world.has_tag(owner, burning));
        assert!(world.revoke_tag(a, burning).unwrap());
        assert!(!world.revoke_tag(a, kind).unwrap());
        assert!(!world.has_tag(owner, burning));
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl WorldObserver for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn on_slotable_activated(&self, event: &SlotableEvent) {
            self.0.lock().unwrap().push(format!("activated {}", event.slotable));
        }

        fn on_slotable_removed(&self, event: &SlotableEvent) {
            self.0.lock().unwrap().push(format!("removed {}", event.slotable));
        }

        fn on_stat_changed(&self, change: &StatChange) {
            self.0
                .lock()
                .unwrap()
                .push(format!("stat {} -> {}", change.old, change.new));
        }
    }

    #[test]
    fn observers_see_transitions_in_order() {
        let Fixture {
            mut world,
            owner,
            kind,
            power,
        } = fixture();
        let recorder = Arc::new(Recorder::default());
        world.register_observer(recorder.clone());

        let card = world.create_card(owner, CardSpec::fixed(1));
        let a = world
            .insert(
                card,
                SlotableSpec::new(kind).with_contribution(power, Modifier::Add(4)),
                Placement::Append,
            )
            .unwrap();
        world.remove(a, RemoveMode::ClearSlot).unwrap();

        let log = recorder.0.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "activated slotable#1",
                "stat 0 -> 4",
                "removed slotable#1",
                "stat 4 -> 0",
            ]
        );
    }

    #[test]
    fn execute_marks_dirty_only_when_applied() {
        let Fixture {
            mut world,
            owner,
            kind,
            ..
        } = fixture();
        let card = world.create_card(owner, CardSpec::fixed(1));
        let a = world
            .insert(card, SlotableSpec::new(kind).with_charges(1), Placement::Append)
            .unwrap();
        world.take_changes();

        let spend = ActionPayload::Activate {
            slotable: a,
            cost: 1,
        };
        assert!(world.execute(card, &spend).unwrap().is_applied());
        assert!(world.take_changes().dirty.contains(&card));
        assert!(!world.execute(card, &spend).unwrap().is_applied());
        assert!(world.take_changes().is_empty());
    }
}
