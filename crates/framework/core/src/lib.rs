//! Composable gameplay state shared by server and clients.
//!
//! `sf-core` defines the Slotable Framework's data model and rules: the
//! [`TagRegistry`], the incremental [`StatAggregator`], Slotables held in
//! ordered [`Card`]s, deterministic predicted actions, and the field-level
//! delta format used to replicate Cards. All authoritative mutation flows
//! through [`World`]; replication crates depend on the types re-exported
//! here.
pub mod action;
pub mod config;
pub mod error;
pub mod state;
pub mod stats;
pub mod tag;
pub mod world;

pub use action::{ActionOutcome, ActionPayload, RejectReason, apply_action};
pub use config::FrameworkConfig;
pub use error::{ErrorContext, ErrorSeverity, FrameworkError};
pub use state::{
    Card, CardChanges, CardDelta, CardError, CardFields, CardHeader, CardId, CardSpec, CardUpdate,
    DeltaCheck, DeltaError, ExecutionContext, Lifecycle, OwnerId, Placement, RemoveMode,
    Sequence, SlotFields, Slotable, SlotableId, SlotableSpec, StateDigest, Version,
};
pub use stats::{
    AggregationMode, Contribution, Modifier, StatAggregator, StatChange, StatDefinition,
    StatError, StatTable, StatTableError, aggregate_contributions,
};
pub use tag::{TagError, TagId, TagRegistry, TagSet};
pub use world::{
    ChangeSet, ObserverRegistry, RemoveOutcome, SlotableEvent, World, WorldError, WorldObserver,
};
