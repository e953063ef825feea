//! Deterministic actions on a single Card.
//!
//! [`apply_action`] is the one transition function shared by server
//! authority and client prediction: given the same Card and payload, both
//! sides reach the same outcome and the same resulting Card.

use crate::state::{Card, SlotableId};

/// A client-issued intent targeting one Card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActionPayload {
    /// Spend `cost` charges and count one activation.
    Activate { slotable: SlotableId, cost: i64 },

    /// Add `amount` charges.
    Recharge { slotable: SlotableId, amount: i64 },

    /// Swap the slots of two Slotables on the same Card.
    Swap { a: SlotableId, b: SlotableId },
}

impl ActionPayload {
    /// Slotables the action depends on. If any of them leaves the Card the
    /// action is invalidated.
    pub fn targets(&self) -> impl Iterator<Item = SlotableId> {
        let (first, second) = match *self {
            Self::Activate { slotable, .. } | Self::Recharge { slotable, .. } => (slotable, None),
            Self::Swap { a, b } => (a, Some(b)),
        };
        std::iter::once(first).chain(second)
    }
}

/// Why an action was refused. The Card is unchanged.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    UnknownSlotable,
    NotActive,
    InsufficientCharges,
    Locked,
    SameSlot,
    InvalidAmount,
    /// The targeted Card does not exist on the server.
    UnknownCard,
    /// The sender does not own the targeted Card.
    NotOwned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActionOutcome {
    Applied,
    Rejected(RejectReason),
}

impl ActionOutcome {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl From<Result<(), RejectReason>> for ActionOutcome {
    fn from(result: Result<(), RejectReason>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(reason) => Self::Rejected(reason),
        }
    }
}

/// Applies `payload` to `card`. Rejected actions leave the Card untouched.
pub fn apply_action(card: &mut Card, payload: &ActionPayload) -> ActionOutcome {
    transition(card, payload).into()
}

fn transition(card: &mut Card, payload: &ActionPayload) -> Result<(), RejectReason> {
    match *payload {
        ActionPayload::Activate { slotable, cost } => {
            if cost < 0 {
                return Err(RejectReason::InvalidAmount);
            }
            let target = active_target(card, slotable)?;
            let context = target.context_mut();
            if context.charges < cost {
                return Err(RejectReason::InsufficientCharges);
            }
            context.charges -= cost;
            context.activations = context.activations.saturating_add(1);
            Ok(())
        }

        ActionPayload::Recharge { slotable, amount } => {
            if amount <= 0 {
                return Err(RejectReason::InvalidAmount);
            }
            let context = active_target(card, slotable)?.context_mut();
            context.charges = context.charges.saturating_add(amount);
            Ok(())
        }

        ActionPayload::Swap { a, b } => {
            if card.is_locked() {
                return Err(RejectReason::Locked);
            }
            if a == b {
                return Err(RejectReason::SameSlot);
            }
            let ia = card.position_of(a).ok_or(RejectReason::UnknownSlotable)?;
            let ib = card.position_of(b).ok_or(RejectReason::UnknownSlotable)?;
            card.swap(ia, ib).map_err(|_| RejectReason::Locked)
        }
    }
}

fn active_target(
    card: &mut Card,
    slotable: SlotableId,
) -> Result<&mut crate::state::Slotable, RejectReason> {
    let target = card
        .slotable_mut(slotable)
        .ok_or(RejectReason::UnknownSlotable)?;
    if !target.is_active() {
        return Err(RejectReason::NotActive);
    }
    Ok(target)
}
