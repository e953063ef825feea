//! Lifecycle callbacks registered by the World's owner.

use std::sync::Arc;

use tracing::debug;

use crate::state::{CardId, OwnerId, SlotableId};
use crate::stats::StatChange;
use crate::tag::TagId;

/// Identity of a Slotable at a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotableEvent {
    pub slotable: SlotableId,
    pub kind: TagId,
    pub card: CardId,
    pub owner: OwnerId,
}

/// Receives World notifications synchronously, at the transition point.
///
/// Observers see the World after the transition completed: an activated
/// Slotable's contributions are already aggregated, a removed one's are
/// already gone.
pub trait WorldObserver: Send + Sync {
    /// Unique name used in logs.
    fn name(&self) -> &'static str;

    /// Lower values run first. Defaults to 0.
    fn priority(&self) -> i32 {
        0
    }

    fn on_slotable_activated(&self, _event: &SlotableEvent) {}

    fn on_slotable_removed(&self, _event: &SlotableEvent) {}

    fn on_stat_changed(&self, _change: &StatChange) {}

    fn on_card_destroyed(&self, _card: CardId, _owner: OwnerId) {}
}

/// Observers sorted by priority.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn WorldObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer, keeping registration order among equal priorities.
    pub fn register(&mut self, observer: Arc<dyn WorldObserver>) {
        debug!(
            target: "sf_core::world",
            observer = observer.name(),
            priority = observer.priority(),
            "registered world observer"
        );
        self.observers.push(observer);
        self.observers.sort_by_key(|o| o.priority());
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Observer names and priorities, in dispatch order.
    pub fn observers(&self) -> impl Iterator<Item = (&'static str, i32)> + '_ {
        self.observers.iter().map(|o| (o.name(), o.priority()))
    }

    pub(crate) fn slotable_activated(&self, event: &SlotableEvent) {
        for observer in &self.observers {
            observer.on_slotable_activated(event);
        }
    }

    pub(crate) fn slotable_removed(&self, event: &SlotableEvent) {
        for observer in &self.observers {
            observer.on_slotable_removed(event);
        }
    }

    pub(crate) fn stats_changed(&self, changes: &[StatChange]) {
        for change in changes {
            for observer in &self.observers {
                observer.on_stat_changed(change);
            }
        }
    }

    pub(crate) fn card_destroyed(&self, card: CardId, owner: OwnerId) {
        for observer in &self.observers {
            observer.on_card_destroyed(card, owner);
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}
