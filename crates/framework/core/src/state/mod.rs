//! Slotable/Card data model and the delta format that replicates it.

mod card;
pub mod delta;
mod digest;
mod ids;
mod slotable;

pub use card::{Card, CardError, CardHeader, CardSpec, Placement, RemoveMode};
pub use delta::{
    CardChanges, CardDelta, CardFields, CardUpdate, DeltaCheck, DeltaError, SlotChanges,
    SlotDiff, SlotFields, SlotPatch, SlotableFieldDiff,
};
pub use digest::StateDigest;
pub use ids::{CardId, OwnerId, Sequence, SlotableId, Version};
pub use slotable::{ExecutionContext, Lifecycle, Slotable, SlotableSpec};
