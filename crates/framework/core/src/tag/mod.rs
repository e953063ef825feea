//! Hierarchical gameplay tags.
//!
//! Tags are interned once per process by [`TagRegistry`] and referred to by
//! [`TagId`] everywhere else. Equality is by id; hierarchy queries
//! (`Ability.Fire` contains `Ability.Fire.Burst`) go through the registry.

mod registry;
mod set;

pub use registry::{TagError, TagId, TagRegistry};
pub use set::TagSet;
