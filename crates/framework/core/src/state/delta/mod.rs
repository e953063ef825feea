//! Field-level Card deltas.
//!
//! The server diffs successive Card snapshots into [`CardChanges`] bitmasks,
//! remembers when each field last changed, and for every observer builds a
//! [`CardDelta`] holding the current values of exactly the fields that
//! changed after that observer's acknowledged version. Field values are
//! absolute, so applying a delta is idempotent and any delta whose base is
//! not newer than the receiver's version can be applied.

mod bitmask;
mod changes;

use std::collections::BTreeMap;

use crate::config::FrameworkConfig;
use crate::error::{ErrorContext, ErrorSeverity, FrameworkError};
use crate::stats::Contribution;
use crate::tag::{TagId, TagSet};

use super::{
    Card, CardHeader, CardId, ExecutionContext, Lifecycle, Slotable, StateDigest, Version,
};

pub use bitmask::{CardFields, SlotFields};
pub use changes::{CardChanges, SlotChanges};

/// Errors raised while applying a delta to a Card view.
///
/// Every variant means the view can no longer be trusted; the receiver
/// discards it and requests a full resynchronization.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("sequence gap: delta based on {base} but view is at {local}")]
    SequenceGap {
        base: Version,
        local: Version,
        context: ErrorContext,
    },

    #[error("delta for {found} applied to {expected}")]
    CardMismatch {
        expected: CardId,
        found: CardId,
        context: ErrorContext,
    },

    #[error("delta patches slot {index} which the view does not have")]
    MissingSlot { index: usize, context: ErrorContext },

    #[error("slot count mismatch: expected {expected}, view has {found}")]
    SlotCountMismatch {
        expected: usize,
        found: usize,
        context: ErrorContext,
    },

    /// The slot count cannot exist under the Card header it arrived with.
    #[error("{slot_count} slots do not fit a card of capacity {capacity}")]
    CapacityViolation {
        slot_count: usize,
        capacity: usize,
        context: ErrorContext,
    },

    #[error("state digest mismatch after applying delta")]
    DigestMismatch { context: ErrorContext },

    #[error("update carries no state digest")]
    MissingDigest { context: ErrorContext },
}

impl FrameworkError for DeltaError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Internal
    }

    fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::SequenceGap { context, .. }
            | Self::CardMismatch { context, .. }
            | Self::MissingSlot { context, .. }
            | Self::SlotCountMismatch { context, .. }
            | Self::CapacityViolation { context, .. }
            | Self::DigestMismatch { context }
            | Self::MissingDigest { context } => Some(context),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::SequenceGap { .. } => "DELTA_SEQUENCE_GAP",
            Self::CardMismatch { .. } => "DELTA_CARD_MISMATCH",
            Self::MissingSlot { .. } => "DELTA_MISSING_SLOT",
            Self::SlotCountMismatch { .. } => "DELTA_SLOT_COUNT_MISMATCH",
            Self::CapacityViolation { .. } => "DELTA_CAPACITY_VIOLATION",
            Self::DigestMismatch { .. } => "DELTA_DIGEST_MISMATCH",
            Self::MissingDigest { .. } => "DELTA_MISSING_DIGEST",
        }
    }
}

/// Changed fields of a Slotable that kept its slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotableFieldDiff {
    pub lifecycle: Option<Lifecycle>,
    pub tags: Option<TagSet>,
    pub contributions: Option<BTreeMap<TagId, Contribution>>,
    pub context: Option<ExecutionContext>,
}

impl SlotableFieldDiff {
    fn from_fields(slotable: &Slotable, fields: SlotFields) -> Self {
        Self {
            lifecycle: fields
                .contains(SlotFields::LIFECYCLE)
                .then(|| slotable.lifecycle()),
            tags: fields
                .contains(SlotFields::TAGS)
                .then(|| slotable.tags().clone()),
            contributions: fields
                .contains(SlotFields::CONTRIBUTIONS)
                .then(|| slotable.contribution_map().clone()),
            context: fields
                .contains(SlotFields::CONTEXT)
                .then(|| *slotable.context()),
        }
    }

    fn apply_to(&self, slotable: &mut Slotable) {
        if let Some(lifecycle) = self.lifecycle {
            slotable.force_lifecycle(lifecycle);
        }
        if let Some(tags) = &self.tags {
            slotable.replace_tags(tags.clone());
        }
        if let Some(contributions) = &self.contributions {
            slotable.replace_contributions(contributions.clone());
        }
        if let Some(context) = self.context {
            slotable.replace_context(context);
        }
    }
}

/// New contents of one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotPatch {
    Cleared,
    Occupied(Box<Slotable>),
    Fields(SlotableFieldDiff),
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotDiff {
    pub index: u32,
    pub patch: SlotPatch,
}

/// Per-Card delta message: everything that changed after `base_version`,
/// bringing a view to `version`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CardDelta {
    pub card: CardId,
    pub base_version: Version,
    pub version: Version,
    pub header: Option<CardHeader>,
    /// Slot count at `version`; always present so the result is checkable.
    pub slot_count: u32,
    pub slots: Vec<SlotDiff>,
    /// Digest of the authoritative Card at `version`.
    pub digest: Option<StateDigest>,
}

/// What a receiver should do with a delta given its own version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaCheck {
    Apply,
    /// Already covered by the view; ignore.
    Stale,
    /// The view is older than the delta's base.
    Gap,
}

impl CardDelta {
    /// Builds a delta carrying the current values of `changes` from `card`.
    pub fn build(
        card: &Card,
        base_version: Version,
        version: Version,
        changes: &CardChanges,
    ) -> Self {
        let header = changes
            .fields
            .contains(CardFields::META)
            .then(|| *card.header());

        let slots = changes
            .slots
            .iter()
            .filter(|c| c.index < card.len())
            .map(|c| {
                let patch = match card.get(c.index) {
                    None => SlotPatch::Cleared,
                    Some(s) if c.fields.contains(SlotFields::IDENTITY) => {
                        SlotPatch::Occupied(Box::new(s.clone()))
                    }
                    Some(s) => SlotPatch::Fields(SlotableFieldDiff::from_fields(s, c.fields)),
                };
                SlotDiff {
                    index: c.index as u32,
                    patch,
                }
            })
            .collect();

        Self {
            card: card.id(),
            base_version,
            version,
            header,
            slot_count: card.len() as u32,
            slots,
            digest: None,
        }
    }

    #[must_use]
    pub fn with_digest(mut self, digest: StateDigest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// A delta that changes nothing but the version.
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.slots.is_empty()
    }

    /// Classifies this delta against a view at `local`.
    pub fn check(&self, local: Version) -> DeltaCheck {
        if local.is_none() || self.base_version > local {
            DeltaCheck::Gap
        } else if self.version <= local {
            DeltaCheck::Stale
        } else {
            DeltaCheck::Apply
        }
    }

    /// Applies the delta to a view that is currently at `local`.
    ///
    /// On error the view may be partially updated and must be discarded.
    pub fn apply_to(&self, card: &mut Card, local: Version) -> Result<(), DeltaError> {
        let context = ErrorContext::new()
            .with_card(self.card)
            .with_version(self.version);

        if card.id() != self.card {
            return Err(DeltaError::CardMismatch {
                expected: card.id(),
                found: self.card,
                context,
            });
        }
        if self.check(local) == DeltaCheck::Gap {
            return Err(DeltaError::SequenceGap {
                base: self.base_version,
                local,
                context,
            });
        }

        let expected = self.slot_count as usize;
        let header = self.header.unwrap_or(*card.header());
        check_shape(&header, expected, &context)?;
        card.set_header(header);

        if card.is_growable() {
            card.resize_slots(expected);
        }
        if card.len() != expected {
            return Err(DeltaError::SlotCountMismatch {
                expected,
                found: card.len(),
                context,
            });
        }

        for diff in &self.slots {
            let index = diff.index as usize;
            let missing = || DeltaError::MissingSlot {
                index,
                context: context.clone(),
            };
            let slot = card.slot_mut(index).ok_or_else(missing)?;
            match &diff.patch {
                SlotPatch::Cleared => *slot = None,
                SlotPatch::Occupied(slotable) => *slot = Some(slotable.as_ref().clone()),
                SlotPatch::Fields(fields) => {
                    let slotable = slot.as_mut().ok_or_else(missing)?;
                    fields.apply_to(slotable);
                }
            }
        }

        Ok(())
    }

    /// Compares `card` against the carried digest.
    ///
    /// A delta without a digest cannot be verified and is rejected.
    #[cfg(feature = "serde")]
    pub fn verify(&self, card: &Card) -> Result<(), DeltaError> {
        let context = ErrorContext::new()
            .with_card(self.card)
            .with_version(self.version);
        match self.digest {
            None => Err(DeltaError::MissingDigest { context }),
            Some(expected) if StateDigest::of_card(card) != expected => {
                Err(DeltaError::DigestMismatch { context })
            }
            Some(_) => Ok(()),
        }
    }
}

/// Rejects a slot count that breaks the Card invariants under `header`.
fn check_shape(
    header: &CardHeader,
    slot_count: usize,
    context: &ErrorContext,
) -> Result<(), DeltaError> {
    let capacity = header.capacity as usize;
    let capacity_ok = (FrameworkConfig::MIN_CARD_CAPACITY..=FrameworkConfig::MAX_CARD_CAPACITY)
        .contains(&capacity);
    let fits = if header.growable {
        slot_count <= capacity
    } else {
        slot_count == capacity
    };
    if capacity_ok && fits {
        Ok(())
    } else {
        Err(DeltaError::CapacityViolation {
            slot_count,
            capacity,
            context: context.clone(),
        })
    }
}

/// Server → client update for one Card.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CardUpdate {
    /// The whole Card; replaces any existing view.
    Full { version: Version, card: Box<Card> },
    Delta(CardDelta),
    /// The Card was destroyed; drop the view.
    Destroyed { card: CardId },
}

impl CardUpdate {
    pub fn card(&self) -> CardId {
        match self {
            Self::Full { card, .. } => card.id(),
            Self::Delta(delta) => delta.card,
            Self::Destroyed { card } => *card,
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            Self::Full { version, .. } => Some(*version),
            Self::Delta(delta) => Some(delta.version),
            Self::Destroyed { .. } => None,
        }
    }

    /// Checks that a `Full` payload is a Card this framework could have built.
    pub fn validate(&self) -> Result<(), DeltaError> {
        match self {
            Self::Full { version, card } => {
                let context = ErrorContext::new()
                    .with_card(card.id())
                    .with_version(*version);
                check_shape(card.header(), card.len(), &context)
            }
            Self::Delta(_) | Self::Destroyed { .. } => Ok(()),
        }
    }
}
