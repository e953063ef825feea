use crate::state::{Card, Slotable};

use super::bitmask::{CardFields, SlotFields};

/// Metadata describing which fields of one slot changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotChanges {
    pub index: usize,
    pub fields: SlotFields,
}

impl SlotChanges {
    /// Compares the occupants of one slot index before and after.
    ///
    /// Returns `None` if nothing changed.
    pub(super) fn from_states(
        index: usize,
        before: Option<&Slotable>,
        after: Option<&Slotable>,
    ) -> Option<Self> {
        let fields = match (before, after) {
            (None, None) => SlotFields::empty(),
            (Some(before), Some(after)) if before.id() == after.id() => {
                let mut fields = SlotFields::empty();
                if before.kind() != after.kind() {
                    fields |= SlotFields::IDENTITY;
                }
                if before.lifecycle() != after.lifecycle() {
                    fields |= SlotFields::LIFECYCLE;
                }
                if before.tags() != after.tags() {
                    fields |= SlotFields::TAGS;
                }
                if before.contribution_map() != after.contribution_map() {
                    fields |= SlotFields::CONTRIBUTIONS;
                }
                if before.context() != after.context() {
                    fields |= SlotFields::CONTEXT;
                }
                fields
            }
            _ => SlotFields::IDENTITY,
        };

        if fields.is_empty() {
            None
        } else {
            Some(Self { index, fields })
        }
    }
}

/// Metadata describing how a Card changed between two snapshots.
///
/// Like the slot-level masks this stores no values; the values are read from
/// the newer Card when a delta is built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardChanges {
    pub fields: CardFields,
    pub slots: Vec<SlotChanges>,
}

impl CardChanges {
    /// Creates changes by comparing two states of the same Card.
    ///
    /// # Complexity
    ///
    /// O(n) in the slot count.
    pub fn from_states(before: &Card, after: &Card) -> Self {
        debug_assert_eq!(before.id(), after.id(), "Cannot compare different cards");

        let mut fields = CardFields::empty();
        if before.header() != after.header() {
            fields |= CardFields::META;
        }
        if before.len() != after.len() {
            fields |= CardFields::SLOT_COUNT;
        }

        let len = before.len().max(after.len());
        let slots = (0..len)
            .filter_map(|i| SlotChanges::from_states(i, before.get(i), after.get(i)))
            .collect();

        Self { fields, slots }
    }

    /// Every slot and header field of `card`, as if it had been created from
    /// nothing.
    pub fn everything(card: &Card) -> Self {
        let mut fields = CardFields::all();
        if card.len() == 0 {
            fields.remove(CardFields::SLOT_COUNT);
        }
        Self {
            fields,
            slots: (0..card.len())
                .map(|index| SlotChanges {
                    index,
                    fields: SlotFields::IDENTITY,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CardId, CardSpec, OwnerId, Placement, SlotableId, SlotableSpec};
    use crate::tag::TagId;

    fn slotable(id: u32) -> Slotable {
        Slotable::from_spec(SlotableId(id), SlotableSpec::new(TagId(0)), || 0)
    }

    #[test]
    fn unchanged_card_has_no_changes() {
        let card = Card::new(CardId(1), OwnerId(1), CardSpec::fixed(3));
        assert!(CardChanges::from_states(&card, &card.clone()).is_empty());
    }

    #[test]
    fn occupant_change_is_identity() {
        let before = Card::new(CardId(1), OwnerId(1), CardSpec::fixed(2));
        let mut after = before.clone();
        after.place(slotable(1), Placement::At(1)).unwrap();

        let changes = CardChanges::from_states(&before, &after);
        assert!(changes.fields.is_empty());
        assert_eq!(
            changes.slots,
            vec![SlotChanges {
                index: 1,
                fields: SlotFields::IDENTITY
            }]
        );
    }

    #[test]
    fn field_changes_are_masked() {
        let mut before = Card::new(CardId(1), OwnerId(1), CardSpec::growable(4));
        before.place(slotable(1), Placement::Append).unwrap();
        let mut after = before.clone();
        if let Some(s) = after.slotable_mut(SlotableId(1)) {
            s.context_mut().charges = 5;
            s.tags_mut().insert(TagId(9));
        }
        after.place(slotable(2), Placement::Append).unwrap();
        after.set_locked(true);

        let changes = CardChanges::from_states(&before, &after);
        assert_eq!(changes.fields, CardFields::META | CardFields::SLOT_COUNT);
        assert_eq!(changes.slots[0].fields, SlotFields::TAGS | SlotFields::CONTEXT);
        assert_eq!(changes.slots[1].fields, SlotFields::IDENTITY);
    }
}
