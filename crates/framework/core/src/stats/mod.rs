//! Stat aggregation.
//!
//! Active Slotables register [`Modifier`]s against stat tags; the
//! [`StatAggregator`] keeps one incrementally maintained value per
//! (owner, stat). How contributions combine is decided per stat by the
//! [`StatTable`].

mod aggregator;
mod modifier;
mod table;

pub use aggregator::{StatAggregator, StatChange, StatError};
pub use modifier::{AggregationMode, Contribution, Modifier, aggregate_contributions};
pub use table::{StatDefinition, StatTable, StatTableError};
