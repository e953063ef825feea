use std::collections::{BTreeMap, HashMap};

use crate::state::OwnerId;
use crate::tag::{TagId, TagRegistry, TagSet};

/// Reference-counted tags per owner, fed by Active Slotables only.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    owners: HashMap<OwnerId, BTreeMap<TagId, u32>>,
}

impl TagIndex {
    pub(crate) fn add(&mut self, owner: OwnerId, tags: &TagSet) {
        let counts = self.owners.entry(owner).or_default();
        for tag in tags.iter() {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }

    pub(crate) fn remove(&mut self, owner: OwnerId, tags: &TagSet) {
        let Some(counts) = self.owners.get_mut(&owner) else {
            return;
        };
        for tag in tags.iter() {
            if let Some(count) = counts.get_mut(&tag) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&tag);
                }
            }
        }
        if counts.is_empty() {
            self.owners.remove(&owner);
        }
    }

    pub(crate) fn has_tag(&self, owner: OwnerId, tag: TagId) -> bool {
        self.owners
            .get(&owner)
            .is_some_and(|counts| counts.contains_key(&tag))
    }

    pub(crate) fn matches_prefix(
        &self,
        owner: OwnerId,
        prefix: TagId,
        registry: &TagRegistry,
    ) -> bool {
        self.owners.get(&owner).is_some_and(|counts| {
            counts.keys().any(|tag| registry.matches(*tag, prefix))
        })
    }
}
