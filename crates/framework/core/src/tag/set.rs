use std::collections::BTreeSet;

use super::{TagId, TagRegistry};

/// Ordered set of tags carried by a Slotable.
///
/// Ordering by id keeps the serialized form (and therefore state digests)
/// independent of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagSet {
    tags: BTreeSet<TagId>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the tag was not already present.
    pub fn insert(&mut self, tag: TagId) -> bool {
        self.tags.insert(tag)
    }

    pub fn remove(&mut self, tag: TagId) -> bool {
        self.tags.remove(&tag)
    }

    /// Exact membership.
    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }

    /// True if any tag in the set equals or descends from `prefix`.
    pub fn has_any_matching(&self, prefix: TagId, registry: &TagRegistry) -> bool {
        self.tags.iter().any(|tag| registry.matches(*tag, prefix))
    }

    pub fn iter(&self) -> impl Iterator<Item = TagId> + '_ {
        self.tags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<TagId> for TagSet {
    fn from_iter<I: IntoIterator<Item = TagId>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

impl Extend<TagId> for TagSet {
    fn extend<I: IntoIterator<Item = TagId>>(&mut self, iter: I) {
        self.tags.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_follows_hierarchy() {
        let registry = TagRegistry::new();
        let burst = registry.register("Ability.Fire.Burst").unwrap();
        let fire = registry.lookup("Ability.Fire").unwrap();
        let frost = registry.register("Ability.Frost").unwrap();
        let set: TagSet = [burst].into_iter().collect();

        assert!(set.has_tag(burst));
        assert!(!set.has_tag(fire));
        assert!(set.has_any_matching(fire, &registry));
        assert!(!set.has_any_matching(frost, &registry));
        assert!(!TagSet::new().has_any_matching(fire, &registry));
    }
}
