//! Process-wide interning of hierarchical tag paths.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::{ErrorSeverity, FrameworkError};

/// Interned identifier of a registered tag path.
///
/// Ids are assigned in registration order. Two processes that register the
/// same paths in the same order agree on every id, which is what
/// [`TagRegistry::manifest_digest`] lets them verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagId(pub u32);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Errors raised by tag registration and lookup.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("invalid tag path '{path}': {reason}")]
    InvalidTagPath { path: String, reason: &'static str },

    #[error("tag {0} is not registered")]
    UnknownTag(TagId),
}

impl FrameworkError for TagError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Validation
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTagPath { .. } => "TAG_INVALID_PATH",
            Self::UnknownTag(_) => "TAG_UNKNOWN",
        }
    }
}

#[derive(Debug)]
struct TagEntry {
    path: Arc<str>,
    parent: Option<TagId>,
    depth: u8,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_path: HashMap<Arc<str>, TagId>,
    entries: Vec<TagEntry>,
}

impl RegistryInner {
    fn entry(&self, tag: TagId) -> Option<&TagEntry> {
        self.entries.get(tag.0 as usize)
    }

    fn insert(&mut self, path: &str, parent: Option<TagId>, depth: u8) -> TagId {
        let id = TagId(self.entries.len() as u32);
        let path: Arc<str> = Arc::from(path);
        self.entries.push(TagEntry {
            path: Arc::clone(&path),
            parent,
            depth,
        });
        self.by_path.insert(path, id);
        id
    }
}

/// Append-only registry mapping hierarchical tag paths (`Ability.Fire.Burst`)
/// to interned [`TagId`]s.
///
/// Registering a path also registers every ancestor, so each entry only has
/// to remember its direct parent. Hierarchy queries walk parent links and are
/// therefore O(depth). The registry is read-mostly after startup; reads take a
/// shared lock and never allocate.
#[derive(Debug, Default)]
pub struct TagRegistry {
    inner: RwLock<RegistryInner>,
}

impl TagRegistry {
    /// Maximum number of segments in a tag path.
    pub const MAX_DEPTH: usize = 16;
    /// Maximum length of a tag path in bytes.
    pub const MAX_PATH_LEN: usize = 255;

    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<TagRegistry> {
        static GLOBAL: OnceLock<Arc<TagRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TagRegistry::new())))
    }

    /// Registers `path` (and its ancestors) and returns its id.
    ///
    /// Idempotent: registering the same path again returns the same id.
    pub fn register(&self, path: &str) -> Result<TagId, TagError> {
        validate_path(path)?;

        let existing = self.inner.read().by_path.get(path).copied();
        if let Some(id) = existing {
            return Ok(id);
        }

        let mut inner = self.inner.write();
        let mut parent = None;
        let mut end = 0;
        for (depth, segment) in path.split('.').enumerate() {
            end += segment.len();
            let prefix = &path[..end];
            let id = match inner.by_path.get(prefix) {
                Some(id) => *id,
                None => inner.insert(prefix, parent, (depth + 1) as u8),
            };
            parent = Some(id);
            // skip the separator
            end += 1;
        }

        // `validate_path` guarantees at least one segment.
        parent.ok_or_else(|| TagError::InvalidTagPath {
            path: path.to_string(),
            reason: "empty path",
        })
    }

    /// Registers every path in order, failing on the first invalid one.
    pub fn register_all<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<TagId>, TagError> {
        paths.into_iter().map(|path| self.register(path)).collect()
    }

    /// Returns the id of an already-registered path.
    pub fn lookup(&self, path: &str) -> Option<TagId> {
        self.inner.read().by_path.get(path).copied()
    }

    /// Returns the full path of a registered tag.
    pub fn path(&self, tag: TagId) -> Option<Arc<str>> {
        self.inner.read().entry(tag).map(|e| Arc::clone(&e.path))
    }

    /// Returns the direct parent of a tag (`A.B` for `A.B.C`).
    pub fn parent(&self, tag: TagId) -> Option<TagId> {
        self.inner.read().entry(tag).and_then(|e| e.parent)
    }

    /// Returns the number of segments in the tag's path.
    pub fn depth(&self, tag: TagId) -> Option<usize> {
        self.inner.read().entry(tag).map(|e| e.depth as usize)
    }

    /// Returns true if `tag` equals `prefix` or descends from it.
    ///
    /// `Ability.Fire.Burst` matches `Ability`, `Ability.Fire` and itself, but
    /// not `Ability.Fi` (matching is by segment, not by string prefix).
    pub fn matches(&self, tag: TagId, prefix: TagId) -> bool {
        if tag == prefix {
            return true;
        }

        let inner = self.inner.read();
        let Some(prefix_depth) = inner.entry(prefix).map(|e| e.depth) else {
            return false;
        };

        let mut current = inner.entry(tag);
        while let Some(entry) = current {
            if entry.depth <= prefix_depth {
                return false;
            }
            match entry.parent {
                Some(parent) if parent == prefix => return true,
                Some(parent) => current = inner.entry(parent),
                None => return false,
            }
        }
        false
    }

    /// Like [`matches`](Self::matches) but resolves the prefix by path.
    pub fn matches_path(&self, tag: TagId, prefix: &str) -> bool {
        self.lookup(prefix)
            .is_some_and(|prefix| self.matches(tag, prefix))
    }

    /// Number of registered tags, ancestors included.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 over every registered path in id order.
    ///
    /// Peers exchange this before trusting each other's tag ids.
    pub fn manifest_digest(&self) -> [u8; 32] {
        let inner = self.inner.read();
        let mut hasher = Sha256::new();
        for entry in &inner.entries {
            hasher.update(entry.path.as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }
}

fn validate_path(path: &str) -> Result<(), TagError> {
    let invalid = |reason| TagError::InvalidTagPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.len() > TagRegistry::MAX_PATH_LEN {
        return Err(invalid("path too long"));
    }

    let mut depth = 0;
    for segment in path.split('.') {
        depth += 1;
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(invalid("illegal character"));
        }
    }
    if depth > TagRegistry::MAX_DEPTH {
        return Err(invalid("too many segments"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let registry = TagRegistry::new();
        let a = registry.register("Ability.Fire.Burst").unwrap();
        let b = registry.register("Ability.Fire.Burst").unwrap();
        assert_eq!(a, b);
        // Ability, Ability.Fire, Ability.Fire.Burst
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn ancestors_are_registered_and_linked() {
        let registry = TagRegistry::new();
        let burst = registry.register("Ability.Fire.Burst").unwrap();
        let fire = registry.lookup("Ability.Fire").unwrap();
        let ability = registry.lookup("Ability").unwrap();

        assert_eq!(registry.parent(burst), Some(fire));
        assert_eq!(registry.parent(fire), Some(ability));
        assert_eq!(registry.parent(ability), None);
        assert_eq!(registry.depth(burst), Some(3));
        assert_eq!(registry.path(fire).as_deref(), Some("Ability.Fire"));
    }

    #[test]
    fn matches_by_segment_hierarchy() {
        let registry = TagRegistry::new();
        let burst = registry.register("Ability.Fire.Burst").unwrap();
        let fire = registry.lookup("Ability.Fire").unwrap();
        let ability = registry.lookup("Ability").unwrap();
        let frost = registry.register("Ability.Frost").unwrap();

        assert!(registry.matches(burst, burst));
        assert!(registry.matches(burst, fire));
        assert!(registry.matches(burst, ability));
        assert!(!registry.matches(fire, burst));
        assert!(!registry.matches(burst, frost));
        assert!(registry.matches_path(burst, "Ability"));
        assert!(!registry.matches_path(burst, "Ability.Fi"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let registry = TagRegistry::new();
        for path in ["", "A..B", ".A", "A.", "A.B-C", "A B", "Ä"] {
            let err = registry.register(path).unwrap_err();
            assert!(matches!(err, TagError::InvalidTagPath { .. }), "{path}");
            assert_eq!(err.severity(), ErrorSeverity::Validation);
        }
        let deep = vec!["a"; TagRegistry::MAX_DEPTH + 1].join(".");
        assert!(registry.register(&deep).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn manifest_digest_depends_on_registration_order() {
        let a = TagRegistry::new();
        a.register_all(["Stat.Power", "Stat.Armor"]).unwrap();
        let b = TagRegistry::new();
        b.register_all(["Stat.Power", "Stat.Armor"]).unwrap();
        let c = TagRegistry::new();
        c.register_all(["Stat.Armor", "Stat.Power"]).unwrap();

        assert_eq!(a.manifest_digest(), b.manifest_digest());
        assert_ne!(a.manifest_digest(), c.manifest_digest());
    }
}
