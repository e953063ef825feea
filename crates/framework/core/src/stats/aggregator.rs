//! Incremental (owner, stat) aggregates built from Slotable contributions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{trace, warn};

use super::modifier::{AggregationMode, Contribution, Modifier, aggregate_contributions};
use super::table::StatTable;
use crate::error::{ErrorSeverity, FrameworkError};
use crate::state::{OwnerId, SlotableId};
use crate::tag::TagId;

/// Errors raised by the aggregator's register/unregister contract.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StatError {
    /// The Slotable is not Active; the operation was ignored.
    #[error("stale contribution from {slotable} to {stat}: slotable is not active")]
    StaleContribution { slotable: SlotableId, stat: TagId },

    #[error("modifier {modifier:?} cannot contribute to {mode} stat {stat}")]
    IncompatibleModifier {
        stat: TagId,
        mode: AggregationMode,
        modifier: Modifier,
    },
}

impl FrameworkError for StatError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::StaleContribution { .. } => ErrorSeverity::Recoverable,
            Self::IncompatibleModifier { .. } => ErrorSeverity::Validation,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::StaleContribution { .. } => "STAT_STALE_CONTRIBUTION",
            Self::IncompatibleModifier { .. } => "STAT_INCOMPATIBLE_MODIFIER",
        }
    }
}

/// A change of one aggregate value, reported only when the value moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatChange {
    pub owner: OwnerId,
    pub stat: TagId,
    pub old: i64,
    pub new: i64,
}

#[derive(Debug, Default)]
struct AggregateEntry {
    contributions: BTreeMap<SlotableId, Contribution>,
    value: i64,
}

#[derive(Debug)]
struct Binding {
    owner: OwnerId,
    stats: BTreeSet<TagId>,
}

/// Holds every live contribution, keyed by the Slotable that made it.
///
/// Only Slotables that are bound (Active) may contribute. Each mutation
/// recomputes the single affected aggregate, so reads are a map lookup.
/// The aggregator never owns Slotables; it only remembers their ids.
#[derive(Debug)]
pub struct StatAggregator {
    table: StatTable,
    aggregates: HashMap<(OwnerId, TagId), AggregateEntry>,
    bindings: HashMap<SlotableId, Binding>,
}

impl StatAggregator {
    pub fn new(table: StatTable) -> Self {
        Self {
            table,
            aggregates: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    pub fn table(&self) -> &StatTable {
        &self.table
    }

    /// Marks `slotable` as Active on behalf of `owner`.
    pub fn bind(&mut self, slotable: SlotableId, owner: OwnerId) {
        self.bindings.entry(slotable).or_insert_with(|| Binding {
            owner,
            stats: BTreeSet::new(),
        });
    }

    pub fn is_bound(&self, slotable: SlotableId) -> bool {
        self.bindings.contains_key(&slotable)
    }

    /// Owner a bound Slotable contributes to.
    pub fn owner_of(&self, slotable: SlotableId) -> Option<OwnerId> {
        self.bindings.get(&slotable).map(|b| b.owner)
    }

    /// Adds or replaces the contribution of `slotable` to `stat`.
    pub fn register_contribution(
        &mut self,
        slotable: SlotableId,
        stat: TagId,
        contribution: Contribution,
    ) -> Result<Option<StatChange>, StatError> {
        let Some(binding) = self.bindings.get_mut(&slotable) else {
            warn!(
                target: "sf_core::stats",
                %slotable,
                %stat,
                "ignoring contribution from inactive slotable"
            );
            return Err(StatError::StaleContribution { slotable, stat });
        };

        let mode = self.table.definition(stat).mode;
        if !contribution.modifier.is_compatible(mode) {
            return Err(StatError::IncompatibleModifier {
                stat,
                mode,
                modifier: contribution.modifier,
            });
        }
        binding.stats.insert(stat);
        let owner = binding.owner;

        let old = self.aggregate(owner, stat);
        let entry = self.aggregates.entry((owner, stat)).or_default();
        entry.contributions.insert(slotable, contribution);
        Ok(self.recompute(owner, stat, old))
    }

    /// Removes the contribution of `slotable` to `stat`, if any.
    pub fn unregister_contribution(
        &mut self,
        slotable: SlotableId,
        stat: TagId,
    ) -> Result<Option<StatChange>, StatError> {
        let Some(binding) = self.bindings.get_mut(&slotable) else {
            warn!(
                target: "sf_core::stats",
                %slotable,
                %stat,
                "ignoring unregister from inactive slotable"
            );
            return Err(StatError::StaleContribution { slotable, stat });
        };
        if !binding.stats.remove(&stat) {
            return Ok(None);
        }
        let owner = binding.owner;
        Ok(self.detach(owner, slotable, stat))
    }

    /// Tears down every contribution of `slotable` and forgets it.
    ///
    /// Must run before the Slotable leaves Active.
    pub fn unbind(&mut self, slotable: SlotableId) -> Vec<StatChange> {
        let Some(binding) = self.bindings.remove(&slotable) else {
            return Vec::new();
        };
        binding
            .stats
            .into_iter()
            .filter_map(|stat| self.detach(binding.owner, slotable, stat))
            .collect()
    }

    /// Moves every contribution of `slotable` to `new_owner`.
    pub fn rebind(&mut self, slotable: SlotableId, new_owner: OwnerId) -> Vec<StatChange> {
        let Some(binding) = self.bindings.get(&slotable) else {
            return Vec::new();
        };
        if binding.owner == new_owner {
            return Vec::new();
        }

        let old_owner = binding.owner;
        let stats: Vec<TagId> = binding.stats.iter().copied().collect();
        let mut changes = Vec::with_capacity(stats.len() * 2);
        for stat in stats {
            let contribution = self
                .aggregates
                .get(&(old_owner, stat))
                .and_then(|entry| entry.contributions.get(&slotable))
                .copied();
            changes.extend(self.detach(old_owner, slotable, stat));

            if let Some(contribution) = contribution {
                let old = self.aggregate(new_owner, stat);
                self.aggregates
                    .entry((new_owner, stat))
                    .or_default()
                    .contributions
                    .insert(slotable, contribution);
                changes.extend(self.recompute(new_owner, stat, old));
            }
        }

        if let Some(binding) = self.bindings.get_mut(&slotable) {
            binding.owner = new_owner;
        }
        changes
    }

    /// Current value of `stat` for `owner`. Stats nobody contributes to read
    /// their (clamped) base value.
    pub fn aggregate(&self, owner: OwnerId, stat: TagId) -> i64 {
        match self.aggregates.get(&(owner, stat)) {
            Some(entry) => entry.value,
            None => aggregate_contributions(self.table.definition(stat), []),
        }
    }

    /// Contributions currently feeding `(owner, stat)`, by Slotable id.
    pub fn contributions(
        &self,
        owner: OwnerId,
        stat: TagId,
    ) -> impl Iterator<Item = (SlotableId, &Contribution)> {
        self.aggregates
            .get(&(owner, stat))
            .into_iter()
            .flat_map(|entry| entry.contributions.iter().map(|(id, c)| (*id, c)))
    }

    fn detach(&mut self, owner: OwnerId, slotable: SlotableId, stat: TagId) -> Option<StatChange> {
        let old = self.aggregate(owner, stat);
        let entry = self.aggregates.get_mut(&(owner, stat))?;
        entry.contributions.remove(&slotable)?;
        if entry.contributions.is_empty() {
            self.aggregates.remove(&(owner, stat));
            let new = self.aggregate(owner, stat);
            return Self::change(owner, stat, old, new);
        }
        self.recompute(owner, stat, old)
    }

    fn recompute(&mut self, owner: OwnerId, stat: TagId, old: i64) -> Option<StatChange> {
        let def = self.table.definition(stat);
        let entry = self.aggregates.get_mut(&(owner, stat))?;
        entry.value = aggregate_contributions(def, entry.contributions.values());
        Self::change(owner, stat, old, entry.value)
    }

    fn change(owner: OwnerId, stat: TagId, old: i64, new: i64) -> Option<StatChange> {
        (old != new).then(|| {
            trace!(target: "sf_core::stats", %owner, %stat, old, new, "aggregate changed");
            StatChange {
                owner,
                stat,
                old,
                new,
            }
        })
    }
}

impl Default for StatAggregator {
    fn default() -> Self {
        Self::new(StatTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatDefinition;

    const OWNER: OwnerId = OwnerId(1);
    const X: TagId = TagId(0);

    fn add(v: i64, stamp: u64) -> Contribution {
        Contribution::new(Modifier::Add(v), stamp)
    }

    #[test]
    fn sum_tracks_register_and_unregister() {
        let mut agg = StatAggregator::default();
        agg.bind(SlotableId(1), OWNER);
        agg.bind(SlotableId(2), OWNER);

        let change = agg.register_contribution(SlotableId(1), X, add(5, 1)).unwrap();
        assert_eq!(
            change,
            Some(StatChange {
                owner: OWNER,
                stat: X,
                old: 0,
                new: 5
            })
        );
        agg.register_contribution(SlotableId(2), X, add(3, 2)).unwrap();
        assert_eq!(agg.aggregate(OWNER, X), 8);

        let changes = agg.unbind(SlotableId(1));
        assert_eq!(changes.len(), 1);
        assert_eq!(agg.aggregate(OWNER, X), 3);
    }

    #[test]
    fn reregistering_replaces_previous_contribution() {
        let mut agg = StatAggregator::default();
        agg.bind(SlotableId(1), OWNER);
        agg.register_contribution(SlotableId(1), X, add(5, 1)).unwrap();
        agg.register_contribution(SlotableId(1), X, add(2, 2)).unwrap();
        assert_eq!(agg.aggregate(OWNER, X), 2);
    }

    #[test]
    fn unchanged_value_reports_no_change() {
        let mut agg = StatAggregator::default();
        agg.bind(SlotableId(1), OWNER);
        agg.register_contribution(SlotableId(1), X, add(0, 1)).unwrap();
        let change = agg.register_contribution(SlotableId(1), X, add(0, 2)).unwrap();
        assert_eq!(change, None);
    }

    #[test]
    fn unbound_slotables_are_stale() {
        let mut agg = StatAggregator::default();
        let err = agg
            .register_contribution(SlotableId(9), X, add(1, 1))
            .unwrap_err();
        assert_eq!(
            err,
            StatError::StaleContribution {
                slotable: SlotableId(9),
                stat: X
            }
        );
        assert!(err.severity().is_recoverable());
        assert_eq!(agg.aggregate(OWNER, X), 0);
        assert!(agg.unbind(SlotableId(9)).is_empty());
    }

    #[test]
    fn incompatible_modifier_is_rejected() {
        let table = StatTable::default().with(X, StatDefinition::override_by_priority());
        let mut agg = StatAggregator::new(table);
        agg.bind(SlotableId(1), OWNER);
        let err = agg
            .register_contribution(SlotableId(1), X, add(1, 1))
            .unwrap_err();
        assert!(matches!(err, StatError::IncompatibleModifier { .. }));
    }

    #[test]
    fn stale_wins_over_incompatible_modifier() {
        let table = StatTable::default().with(X, StatDefinition::override_by_priority());
        let mut agg = StatAggregator::new(table);
        let err = agg
            .register_contribution(SlotableId(9), X, add(1, 1))
            .unwrap_err();
        assert_eq!(
            err,
            StatError::StaleContribution {
                slotable: SlotableId(9),
                stat: X
            }
        );
    }

    #[test]
    fn rebind_moves_contributions_between_owners() {
        let other = OwnerId(2);
        let mut agg = StatAggregator::default();
        agg.bind(SlotableId(1), OWNER);
        agg.register_contribution(SlotableId(1), X, add(4, 1)).unwrap();

        let changes = agg.rebind(SlotableId(1), other);
        assert_eq!(changes.len(), 2);
        assert_eq!(agg.aggregate(OWNER, X), 0);
        assert_eq!(agg.aggregate(other, X), 4);
        assert_eq!(agg.owner_of(SlotableId(1)), Some(other));
    }

    #[test]
    fn base_value_is_read_without_contributions() {
        let table = StatTable::default().with(X, StatDefinition::sum().with_base(7));
        let agg = StatAggregator::new(table);
        assert_eq!(agg.aggregate(OWNER, X), 7);
    }
}
