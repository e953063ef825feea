use std::collections::BTreeMap;

use super::{CardId, SlotableId};
use crate::stats::{Contribution, Modifier};
use crate::tag::{TagId, TagSet};

/// Lifecycle of a Slotable: `Pending → Active → Removed`. `Removed` is
/// terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    /// Created but not yet attached to a Card slot.
    #[default]
    Pending,
    /// Attached; tags and stat contributions are live.
    Active,
    Removed,
}

impl Lifecycle {
    /// Returns true if `self → next` is a legal transition.
    pub const fn can_transition_to(self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Pending, Lifecycle::Active)
                | (Lifecycle::Pending, Lifecycle::Removed)
                | (Lifecycle::Active, Lifecycle::Removed)
        )
    }
}

/// Mutable state used by predicted actions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionContext {
    pub charges: i64,
    pub activations: u32,
}

impl ExecutionContext {
    pub const fn with_charges(charges: i64) -> Self {
        Self {
            charges,
            activations: 0,
        }
    }
}

/// Blueprint for a new Slotable. The [`World`](crate::World) assigns its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotableSpec {
    pub kind: TagId,
    pub tags: Vec<TagId>,
    pub contributions: Vec<(TagId, Modifier)>,
    pub charges: i64,
}

impl SlotableSpec {
    pub fn new(kind: TagId) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            contributions: Vec::new(),
            charges: 0,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: TagId) -> Self {
        self.tags.push(tag);
        self
    }

    #[must_use]
    pub fn with_contribution(mut self, stat: TagId, modifier: Modifier) -> Self {
        self.contributions.push((stat, modifier));
        self
    }

    #[must_use]
    pub fn with_charges(mut self, charges: i64) -> Self {
        self.charges = charges;
        self
    }
}

/// A unit of composable behavior held in a Card slot.
///
/// The Card back-reference is an id only; the Card owns the Slotable, never
/// the other way round.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Slotable {
    id: SlotableId,
    kind: TagId,
    card: Option<CardId>,
    lifecycle: Lifecycle,
    tags: TagSet,
    contributions: BTreeMap<TagId, Contribution>,
    context: ExecutionContext,
}

impl Slotable {
    /// Builds a Pending Slotable. `stamp` allocates one registration stamp
    /// per contribution, in spec order.
    pub(crate) fn from_spec(
        id: SlotableId,
        spec: SlotableSpec,
        mut stamp: impl FnMut() -> u64,
    ) -> Self {
        let mut tags: TagSet = spec.tags.into_iter().collect();
        tags.insert(spec.kind);
        let contributions = spec
            .contributions
            .into_iter()
            .map(|(stat, modifier)| (stat, Contribution::new(modifier, stamp())))
            .collect();
        Self {
            id,
            kind: spec.kind,
            card: None,
            lifecycle: Lifecycle::Pending,
            tags,
            contributions,
            context: ExecutionContext::with_charges(spec.charges),
        }
    }

    pub fn id(&self) -> SlotableId {
        self.id
    }

    /// Class identity of the Slotable.
    pub fn kind(&self) -> TagId {
        self.kind
    }

    pub fn card(&self) -> Option<CardId> {
        self.card
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Every tag carried, the kind included.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn contributions(&self) -> impl Iterator<Item = (TagId, &Contribution)> {
        self.contributions.iter().map(|(stat, c)| (*stat, c))
    }

    pub fn contribution(&self, stat: TagId) -> Option<&Contribution> {
        self.contributions.get(&stat)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub(crate) fn set_card(&mut self, card: Option<CardId>) {
        self.card = card;
    }

    /// Moves to `next` if the transition is legal; returns whether it moved.
    pub(crate) fn transition(&mut self, next: Lifecycle) -> bool {
        if self.lifecycle.can_transition_to(next) {
            self.lifecycle = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn tags_mut(&mut self) -> &mut TagSet {
        &mut self.tags
    }

    pub(crate) fn set_contribution(&mut self, stat: TagId, contribution: Contribution) {
        self.contributions.insert(stat, contribution);
    }

    pub(crate) fn clear_contribution(&mut self, stat: TagId) -> Option<Contribution> {
        self.contributions.remove(&stat)
    }

    pub(crate) fn replace_tags(&mut self, tags: TagSet) {
        self.tags = tags;
    }

    pub(crate) fn replace_contributions(&mut self, contributions: BTreeMap<TagId, Contribution>) {
        self.contributions = contributions;
    }

    pub(crate) fn replace_context(&mut self, context: ExecutionContext) {
        self.context = context;
    }

    pub(crate) fn force_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    pub(crate) fn contribution_map(&self) -> &BTreeMap<TagId, Contribution> {
        &self.contributions
    }
}
