//! Stat modifiers and the single combination function shared by the server
//! aggregator and client-side views.
//!
//! Layered stats follow a fixed application order:
//! Base → Add → %Increased → More → Flat, clamped after every step.

use super::table::StatDefinition;

/// How contributions to a stat are combined.
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
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AggregationMode {
    /// `base + Σ Add`, order-independent.
    #[default]
    Sum,

    /// The highest-priority `Override` wins; ties go to the most recently
    /// registered contribution. Falls back to the base value.
    OverrideByPriority,

    /// The additive / percentage / multiplicative stack.
    Layered,
}

/// A single modifier a Slotable contributes to a stat.
///
/// Percentages are integer percents: `Increased(20)` is +20%,
/// `More(50)` is ×1.5 and `More(-10)` is ×0.9.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modifier {
    /// Additive delta (Sum and Layered).
    Add(i64),

    /// Candidate value for OverrideByPriority stats.
    Override { value: i64, priority: i32 },

    /// Percentage increase, summed with the other increases (Layered).
    Increased(i32),

    /// Sequential multiplier (Layered).
    More(i32),

    /// Flat addition applied after all multipliers (Layered).
    Flat(i64),
}

impl Modifier {
    /// Returns true if this modifier can contribute to a stat with `mode`.
    pub const fn is_compatible(&self, mode: AggregationMode) -> bool {
        match (self, mode) {
            (Modifier::Add(_), AggregationMode::Sum | AggregationMode::Layered) => true,
            (Modifier::Override { .. }, AggregationMode::OverrideByPriority) => true,
            (
                Modifier::Increased(_) | Modifier::More(_) | Modifier::Flat(_),
                AggregationMode::Layered,
            ) => true,
            _ => false,
        }
    }
}

/// A registered modifier together with its registration stamp.
///
/// The stamp is allocated from a world-wide counter when the contribution is
/// registered. It breaks override ties and fixes the order of `More`
/// multipliers, so every peer combines contributions identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Contribution {
    pub modifier: Modifier,
    pub stamp: u64,
}

impl Contribution {
    pub const fn new(modifier: Modifier, stamp: u64) -> Self {
        Self { modifier, stamp }
    }
}

/// Combines contributions into the stat's current value.
///
/// Contributions incompatible with the definition's mode are skipped; the
/// aggregator never admits them, so this only matters for hand-built views.
pub fn aggregate_contributions<'a>(
    def: &StatDefinition,
    contributions: impl IntoIterator<Item = &'a Contribution>,
) -> i64 {
    let clamp = |value: i128| value.clamp(def.min as i128, def.max as i128);

    match def.mode {
        AggregationMode::Sum => {
            let sum: i128 = contributions
                .into_iter()
                .filter_map(|c| match c.modifier {
                    Modifier::Add(v) => Some(v as i128),
                    _ => None,
                })
                .sum();
            clamp(def.base as i128 + sum) as i64
        }

        AggregationMode::OverrideByPriority => {
            let winner = contributions
                .into_iter()
                .filter_map(|c| match c.modifier {
                    Modifier::Override { value, priority } => Some((priority, c.stamp, value)),
                    _ => None,
                })
                .max_by_key(|(priority, stamp, _)| (*priority, *stamp));
            let value = winner.map_or(def.base, |(_, _, value)| value);
            clamp(value as i128) as i64
        }

        AggregationMode::Layered => {
            let mut ordered: Vec<&Contribution> = contributions.into_iter().collect();
            ordered.sort_by_key(|c| c.stamp);

            // Step 1: base + additive
            let mut value = clamp(def.base as i128);
            for c in &ordered {
                if let Modifier::Add(v) = c.modifier {
                    value = clamp(value + v as i128);
                }
            }

            // Step 2: summed percentage increases
            let increased: i128 = ordered
                .iter()
                .filter_map(|c| match c.modifier {
                    Modifier::Increased(p) => Some(p as i128),
                    _ => None,
                })
                .sum();
            if increased != 0 {
                let multiplier = (100 + increased).max(0);
                value = clamp(value * multiplier / 100);
            }

            // Step 3: sequential multipliers in registration order
            for c in &ordered {
                if let Modifier::More(p) = c.modifier {
                    let multiplier = (100 + p as i128).max(0);
                    value = clamp(value * multiplier / 100);
                }
            }

            // Step 4: post-multiplier flat additions
            for c in &ordered {
                if let Modifier::Flat(v) = c.modifier {
                    value = clamp(value + v as i128);
                }
            }

            value as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contrib(modifier: Modifier, stamp: u64) -> Contribution {
        Contribution::new(modifier, stamp)
    }

    #[test]
    fn sum_adds_to_base_and_clamps() {
        let def = StatDefinition::sum().with_base(10).with_bounds(0, 20);
        let cs = [contrib(Modifier::Add(5), 1), contrib(Modifier::Add(3), 2)];
        assert_eq!(aggregate_contributions(&def, &cs), 18);

        let cs = [contrib(Modifier::Add(50), 1)];
        assert_eq!(aggregate_contributions(&def, &cs), 20);
    }

    #[test]
    fn override_prefers_priority_then_latest_stamp() {
        let def = StatDefinition::override_by_priority().with_base(1);
        assert_eq!(aggregate_contributions(&def, []), 1);

        let cs = [
            contrib(Modifier::Override { value: 10, priority: 2 }, 1),
            contrib(Modifier::Override { value: 20, priority: 1 }, 5),
        ];
        assert_eq!(aggregate_contributions(&def, &cs), 10);

        let cs = [
            contrib(Modifier::Override { value: 10, priority: 2 }, 1),
            contrib(Modifier::Override { value: 30, priority: 2 }, 7),
        ];
        assert_eq!(aggregate_contributions(&def, &cs), 30);
    }

    #[test]
    fn layered_applies_stack_in_order() {
        // (100 + 20) × 1.5 (20% + 30%) × 2.0 + 7 = 367
        let def = StatDefinition::layered().with_base(100);
        let cs = [
            contrib(Modifier::Flat(7), 1),
            contrib(Modifier::More(100), 2),
            contrib(Modifier::Increased(20), 3),
            contrib(Modifier::Add(20), 4),
            contrib(Modifier::Increased(30), 5),
        ];
        assert_eq!(aggregate_contributions(&def, &cs), 367);
    }

    #[test]
    fn layered_clamps_each_step() {
        let def = StatDefinition::layered().with_base(10).with_bounds(0, 100);
        // 10 - 50 clamps to 0 before the flat step, so the result is 5 not -35
        let cs = [contrib(Modifier::Add(-50), 1), contrib(Modifier::Flat(5), 2)];
        assert_eq!(aggregate_contributions(&def, &cs), 5);
    }

    #[test]
    fn compatibility_follows_mode() {
        assert!(Modifier::Add(1).is_compatible(AggregationMode::Sum));
        assert!(Modifier::Add(1).is_compatible(AggregationMode::Layered));
        assert!(!Modifier::Add(1).is_compatible(AggregationMode::OverrideByPriority));
        assert!(!Modifier::More(10).is_compatible(AggregationMode::Sum));
        assert!(
            Modifier::Override { value: 1, priority: 0 }
                .is_compatible(AggregationMode::OverrideByPriority)
        );
    }

    #[test]
    fn mode_parses_from_snake_case() {
        assert_eq!(
            "override_by_priority".parse::<AggregationMode>().unwrap(),
            AggregationMode::OverrideByPriority
        );
        assert_eq!("LAYERED".parse::<AggregationMode>().unwrap(), AggregationMode::Layered);
        assert_eq!(AggregationMode::Sum.as_ref(), "sum");
    }
}
