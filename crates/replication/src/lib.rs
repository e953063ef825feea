//! Push-model replication and client prediction for `sf-core` Cards.
//!
//! The [`ReplicationServer`] owns the authoritative [`sf_core::World`].
//! Once per network tick it applies client actions, commits dirty Cards
//! into versioned snapshots and pushes each connection the field-level
//! deltas it has not acknowledged yet. A [`ClientSession`] keeps confirmed
//! views of those Cards, predicts actions on the Cards its owner controls
//! and reconciles the predictions when the server's results arrive.
//!
//! Transport is a pair of in-process queues per connection ([`link`]);
//! packets are bincode-encoded [`wire`] types.
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod server;
pub mod wire;

pub use client::{
    ClientSession, PollReport, PredictedAction, PredictionStatus, Predictor, Reconciliation,
    SessionState,
};
pub use config::ReplicationConfig;
pub use error::{ReplicationError, Result};
pub use events::{BusObserver, Event, EventBus, LifecycleEvent, ReplicationEvent, Topic};
pub use link::{Endpoint, link};
pub use server::{ConnectionState, ObserverState, ReplicationServer, Snapshot, TickReport};
pub use wire::{ActionMessage, ActionResult, ClientPacket, ConnectionId, ServerPacket};
