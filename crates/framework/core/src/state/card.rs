use super::{CardId, OwnerId, Slotable, SlotableId};
use crate::config::FrameworkConfig;
use crate::error::{ErrorSeverity, FrameworkError};
use crate::stats::{StatTable, aggregate_contributions};
use crate::tag::{TagId, TagRegistry};

/// Errors raised by Card insertion, removal and rearrangement.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    #[error("slot {index} of {card} is occupied")]
    SlotOccupied { card: CardId, index: usize },

    #[error("{card} is full (capacity {capacity})")]
    CapacityExceeded { card: CardId, capacity: usize },

    #[error("slot {index} is out of range for {card} ({len} slots)")]
    IndexOutOfRange {
        card: CardId,
        index: usize,
        len: usize,
    },

    #[error("slot {index} of {card} is empty")]
    SlotEmpty { card: CardId, index: usize },

    #[error("{card} is locked")]
    Locked { card: CardId },

    #[error("cannot swap slot {index} of {card} with itself")]
    SameSlot { card: CardId, index: usize },

    #[error("{card} is not growable")]
    NotGrowable { card: CardId },

    #[error("{0} does not exist")]
    UnknownCard(CardId),

    #[error("{0} is not live")]
    UnknownSlotable(SlotableId),
}

impl FrameworkError for CardError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SlotOccupied { .. }
            | Self::CapacityExceeded { .. }
            | Self::SlotEmpty { .. }
            | Self::Locked { .. } => ErrorSeverity::Recoverable,
            Self::IndexOutOfRange { .. }
            | Self::SameSlot { .. }
            | Self::NotGrowable { .. }
            | Self::UnknownCard(_)
            | Self::UnknownSlotable(_) => ErrorSeverity::Validation,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::SlotOccupied { .. } => "CARD_SLOT_OCCUPIED",
            Self::CapacityExceeded { .. } => "CARD_CAPACITY_EXCEEDED",
            Self::IndexOutOfRange { .. } => "CARD_INDEX_OUT_OF_RANGE",
            Self::SlotEmpty { .. } => "CARD_SLOT_EMPTY",
            Self::Locked { .. } => "CARD_LOCKED",
            Self::SameSlot { .. } => "CARD_SAME_SLOT",
            Self::NotGrowable { .. } => "CARD_NOT_GROWABLE",
            Self::UnknownCard(_) => "CARD_UNKNOWN",
            Self::UnknownSlotable(_) => "CARD_UNKNOWN_SLOTABLE",
        }
    }
}

/// Where a new Slotable goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Placement {
    /// First empty slot (fixed Cards) or a new trailing slot (growable).
    Append,
    /// An existing empty slot. Never overwrites.
    At(usize),
    /// An existing slot, displacing its occupant.
    Replace(usize),
    /// A new slot at the index, shifting later slots up. Growable only.
    InsertAt(usize),
}

/// What happens to the slot a Slotable is removed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemoveMode {
    /// Leave an empty slot behind.
    #[default]
    ClearSlot,
    /// Delete the slot, shifting later slots down. Growable only.
    RemoveSlot,
}

/// Options a Card is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardSpec {
    pub capacity: usize,
    pub growable: bool,
    pub locked: bool,
}

impl CardSpec {
    /// A fixed Card with exactly `capacity` slots.
    pub const fn fixed(capacity: usize) -> Self {
        Self {
            capacity,
            growable: false,
            locked: false,
        }
    }

    /// A Card that starts empty and grows up to `capacity` slots.
    pub const fn growable(capacity: usize) -> Self {
        Self {
            capacity,
            growable: true,
            locked: false,
        }
    }

    #[must_use]
    pub const fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// Replicated Card metadata, everything except the slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardHeader {
    pub owner: OwnerId,
    pub capacity: u8,
    pub growable: bool,
    pub locked: bool,
}

/// An ordered container of Slotables owned by one actor.
///
/// Invariant: `slots.len() <= capacity`, and for fixed Cards
/// `slots.len() == capacity`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Card {
    id: CardId,
    header: CardHeader,
    slots: Vec<Option<Slotable>>,
}

impl Card {
    pub fn new(id: CardId, owner: OwnerId, spec: CardSpec) -> Self {
        let capacity = FrameworkConfig::clamp_capacity(spec.capacity);
        let slots = if spec.growable {
            Vec::with_capacity(capacity)
        } else {
            vec![None; capacity]
        };
        Self {
            id,
            header: CardHeader {
                owner,
                capacity: capacity as u8,
                growable: spec.growable,
                locked: spec.locked,
            },
            slots,
        }
    }

    pub fn id(&self) -> CardId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.header.owner
    }

    pub fn capacity(&self) -> usize {
        self.header.capacity as usize
    }

    pub fn is_growable(&self) -> bool {
        self.header.growable
    }

    pub fn is_locked(&self) -> bool {
        self.header.locked
    }

    pub fn header(&self) -> &CardHeader {
        &self.header
    }

    /// Number of slots, empty ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// How many more Slotables fit.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.occupied())
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    pub fn slots(&self) -> &[Option<Slotable>] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Slotable> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots in order, with their indices.
    pub fn slotables(&self) -> impl Iterator<Item = (usize, &Slotable)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    pub fn position_of(&self, slotable: SlotableId) -> Option<usize> {
        self.slotables()
            .find(|(_, s)| s.id() == slotable)
            .map(|(i, _)| i)
    }

    pub fn slotable(&self, slotable: SlotableId) -> Option<&Slotable> {
        self.slotables().find(|(_, s)| s.id() == slotable).map(|(_, s)| s)
    }

    pub(crate) fn slotable_mut(&mut self, slotable: SlotableId) -> Option<&mut Slotable> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.id() == slotable)
    }

    /// Slotables whose kind equals or descends from `kind`.
    pub fn slotables_of_kind<'a>(
        &'a self,
        kind: TagId,
        registry: &'a TagRegistry,
    ) -> impl Iterator<Item = &'a Slotable> + 'a {
        self.slotables()
            .map(|(_, s)| s)
            .filter(move |s| registry.matches(s.kind(), kind))
    }

    pub fn count_of_kind(&self, kind: TagId, registry: &TagRegistry) -> usize {
        self.slotables_of_kind(kind, registry).count()
    }

    pub fn has_slotable_of_kind(&self, kind: TagId, registry: &TagRegistry) -> bool {
        self.slotables_of_kind(kind, registry).next().is_some()
    }

    /// This Card's own view of `stat`: the combination of contributions from
    /// its Active Slotables only.
    ///
    /// The authoritative aggregate spans every Card of the owner and lives in
    /// the [`StatAggregator`](crate::stats::StatAggregator); clients use this
    /// to read stats off replicated Cards.
    pub fn aggregate(&self, stat: TagId, table: &StatTable) -> i64 {
        let contributions = self
            .slotables()
            .map(|(_, s)| s)
            .filter(|s| s.is_active())
            .filter_map(|s| s.contribution(stat));
        aggregate_contributions(table.definition(stat), contributions)
    }

    fn check_unlocked(&self) -> Result<(), CardError> {
        if self.header.locked {
            return Err(CardError::Locked { card: self.id });
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), CardError> {
        if index >= self.slots.len() {
            return Err(CardError::IndexOutOfRange {
                card: self.id,
                index,
                len: self.slots.len(),
            });
        }
        Ok(())
    }

    fn capacity_exceeded(&self) -> CardError {
        CardError::CapacityExceeded {
            card: self.id,
            capacity: self.capacity(),
        }
    }

    /// Validates a placement without mutating; returns the target index.
    pub fn check_placement(&self, placement: Placement) -> Result<usize, CardError> {
        self.check_unlocked()?;
        match placement {
            Placement::Append => {
                if let Some(index) = self.slots.iter().position(Option::is_none) {
                    return Ok(index);
                }
                if self.header.growable && self.slots.len() < self.capacity() {
                    return Ok(self.slots.len());
                }
                Err(self.capacity_exceeded())
            }
            Placement::At(index) => {
                self.check_index(index)?;
                if self.slots[index].is_some() {
                    return Err(CardError::SlotOccupied {
                        card: self.id,
                        index,
                    });
                }
                Ok(index)
            }
            Placement::Replace(index) => {
                self.check_index(index)?;
                Ok(index)
            }
            Placement::InsertAt(index) => {
                if !self.header.growable {
                    return Err(CardError::NotGrowable { card: self.id });
                }
                if index > self.slots.len() {
                    return Err(CardError::IndexOutOfRange {
                        card: self.id,
                        index,
                        len: self.slots.len(),
                    });
                }
                if self.slots.len() >= self.capacity() {
                    return Err(self.capacity_exceeded());
                }
                Ok(index)
            }
        }
    }

    /// Places `slotable`, returning its index and any displaced occupant.
    pub(crate) fn place(
        &mut self,
        mut slotable: Slotable,
        placement: Placement,
    ) -> Result<(usize, Option<Slotable>), CardError> {
        let index = self.check_placement(placement)?;
        slotable.set_card(Some(self.id));

        let displaced = match placement {
            Placement::InsertAt(_) => {
                self.slots.insert(index, Some(slotable));
                None
            }
            _ if index == self.slots.len() => {
                self.slots.push(Some(slotable));
                None
            }
            _ => self.slots[index].replace(slotable).map(|mut previous| {
                previous.set_card(None);
                previous
            }),
        };
        Ok((index, displaced))
    }

    /// Takes the occupant of `index` out of the Card.
    pub(crate) fn take(&mut self, index: usize, mode: RemoveMode) -> Result<Slotable, CardError> {
        self.check_unlocked()?;
        self.check_index(index)?;
        if mode == RemoveMode::RemoveSlot && !self.header.growable {
            return Err(CardError::NotGrowable { card: self.id });
        }

        let taken = match mode {
            RemoveMode::ClearSlot => self.slots[index].take(),
            RemoveMode::RemoveSlot => {
                if self.slots[index].is_none() {
                    None
                } else {
                    self.slots.remove(index)
                }
            }
        };
        let mut slotable = taken.ok_or(CardError::SlotEmpty {
            card: self.id,
            index,
        })?;
        slotable.set_card(None);
        Ok(slotable)
    }

    /// Swaps two slots (either may be empty).
    pub(crate) fn swap(&mut self, a: usize, b: usize) -> Result<(), CardError> {
        self.check_unlocked()?;
        self.check_index(a)?;
        self.check_index(b)?;
        if a == b {
            return Err(CardError::SameSlot {
                card: self.id,
                index: a,
            });
        }
        self.slots.swap(a, b);
        Ok(())
    }

    /// Puts `slotable` into an existing slot unconditionally, returning the
    /// previous occupant. Callers validate first.
    pub(crate) fn exchange(&mut self, index: usize, mut slotable: Slotable) -> Option<Slotable> {
        slotable.set_card(Some(self.id));
        let mut previous = self.slots.get_mut(index)?.replace(slotable);
        if let Some(previous) = previous.as_mut() {
            previous.set_card(None);
        }
        previous
    }

    /// Empties the Card, returning the occupants in slot order.
    pub(crate) fn drain(&mut self) -> Vec<Slotable> {
        let drained: Vec<Slotable> = self
            .slots
            .iter_mut()
            .filter_map(Option::take)
            .map(|mut s| {
                s.set_card(None);
                s
            })
            .collect();
        if self.header.growable {
            self.slots.clear();
        }
        drained
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.header.locked = locked;
    }

    pub(crate) fn set_header(&mut self, header: CardHeader) {
        self.header = header;
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Option<Slotable>> {
        self.slots.get_mut(index)
    }

    pub(crate) fn resize_slots(&mut self, len: usize) {
        self.slots.resize(len, None);
    }
}
