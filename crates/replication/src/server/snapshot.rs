//! Authoritative per-Card replication snapshots.

use sf_core::state::{CardChanges, CardFields, SlotChanges, SlotFields};
use sf_core::{Card, CardDelta, CardUpdate, StateDigest, Version};

const SLOT_FIELDS: [SlotFields; 5] = [
    SlotFields::IDENTITY,
    SlotFields::LIFECYCLE,
    SlotFields::TAGS,
    SlotFields::CONTRIBUTIONS,
    SlotFields::CONTEXT,
];

const CARD_FIELDS: [CardFields; 2] = [CardFields::META, CardFields::SLOT_COUNT];

/// Version at which each field of one slot last changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FieldVersions([Version; SLOT_FIELDS.len()]);

impl FieldVersions {
    fn record(&mut self, fields: SlotFields, version: Version) {
        for (slot, flag) in self.0.iter_mut().zip(SLOT_FIELDS) {
            if fields.contains(flag) {
                *slot = version;
            }
        }
    }

    fn since(&self, base: Version) -> SlotFields {
        self.0
            .iter()
            .zip(SLOT_FIELDS)
            .filter(|(version, _)| **version > base)
            .fold(SlotFields::empty(), |acc, (_, flag)| acc | flag)
    }
}

/// The committed state of one Card plus the change history needed to build
/// a delta against any acknowledged version.
#[derive(Debug)]
pub struct Snapshot {
    card: Card,
    version: Version,
    digest: StateDigest,
    header: [Version; CARD_FIELDS.len()],
    slots: Vec<FieldVersions>,
}

impl Snapshot {
    /// First commit of a Card: every field changed at `Version::INITIAL`.
    pub fn new(card: &Card) -> Self {
        let mut snapshot = Self {
            card: card.clone(),
            version: Version::INITIAL,
            digest: StateDigest::of_card(card),
            header: [Version::INITIAL; CARD_FIELDS.len()],
            slots: Vec::new(),
        };
        snapshot.record(&CardChanges::everything(card));
        snapshot
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn digest(&self) -> StateDigest {
        self.digest
    }

    /// Commits the current state. Returns the changes if anything differed,
    /// in which case the version advanced by one.
    pub fn commit(&mut self, card: &Card) -> Option<CardChanges> {
        let changes = CardChanges::from_states(&self.card, card);
        if changes.is_empty() {
            return None;
        }
        self.version = self.version.next();
        self.record(&changes);
        self.card = card.clone();
        self.digest = StateDigest::of_card(card);
        Some(changes)
    }

    fn record(&mut self, changes: &CardChanges) {
        let version = self.version;
        for (slot, flag) in self.header.iter_mut().zip(CARD_FIELDS) {
            if changes.fields.contains(flag) {
                *slot = version;
            }
        }
        for change in &changes.slots {
            if self.slots.len() <= change.index {
                self.slots.resize(change.index + 1, FieldVersions::default());
            }
            self.slots[change.index].record(change.fields, version);
        }
    }

    /// Every field that changed after `base`.
    pub fn changes_since(&self, base: Version) -> CardChanges {
        let fields = self
            .header
            .iter()
            .zip(CARD_FIELDS)
            .filter(|(version, _)| **version > base)
            .fold(CardFields::empty(), |acc, (_, flag)| acc | flag);

        let slots = self
            .slots
            .iter()
            .take(self.card.len())
            .enumerate()
            .filter_map(|(index, versions)| {
                let fields = versions.since(base);
                (!fields.is_empty()).then_some(SlotChanges { index, fields })
            })
            .collect();

        CardChanges { fields, slots }
    }

    /// Cumulative delta from `base` to the current version.
    pub fn delta_since(&self, base: Version) -> CardUpdate {
        let changes = self.changes_since(base);
        CardUpdate::Delta(
            CardDelta::build(&self.card, base, self.version, &changes).with_digest(self.digest),
        )
    }

    pub fn full(&self) -> CardUpdate {
        CardUpdate::Full {
            version: self.version,
            card: Box::new(self.card.clone()),
        }
    }
}
