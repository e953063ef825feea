//! Stat definitions: how each stat tag combines its contributions.

use std::collections::BTreeMap;

use super::modifier::AggregationMode;
use crate::config::FrameworkConfig;
use crate::tag::{TagError, TagId, TagRegistry};

/// Definition of one stat: combination mode, base value and clamp bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StatDefinition {
    pub mode: AggregationMode,
    pub base: i64,
    pub min: i64,
    pub max: i64,
}

impl StatDefinition {
    pub const fn new(mode: AggregationMode) -> Self {
        Self {
            mode,
            base: 0,
            min: FrameworkConfig::DEFAULT_STAT_MIN,
            max: FrameworkConfig::DEFAULT_STAT_MAX,
        }
    }

    pub const fn sum() -> Self {
        Self::new(AggregationMode::Sum)
    }

    pub const fn override_by_priority() -> Self {
        Self::new(AggregationMode::OverrideByPriority)
    }

    pub const fn layered() -> Self {
        Self::new(AggregationMode::Layered)
    }

    #[must_use]
    pub const fn with_base(mut self, base: i64) -> Self {
        self.base = base;
        self
    }

    /// Sets the clamp bounds. Swapped bounds are reordered.
    #[must_use]
    pub const fn with_bounds(mut self, min: i64, max: i64) -> Self {
        if min <= max {
            self.min = min;
            self.max = max;
        } else {
            self.min = max;
            self.max = min;
        }
        self
    }
}

impl Default for StatDefinition {
    fn default() -> Self {
        Self::sum()
    }
}

/// Errors raised while loading a stat table from text.
#[derive(Debug, thiserror::Error)]
pub enum StatTableError {
    #[error("failed to parse stat table: {0}")]
    Parse(String),

    #[error(transparent)]
    Tag(#[from] TagError),
}

impl crate::error::FrameworkError for StatTableError {
    fn severity(&self) -> crate::error::ErrorSeverity {
        crate::error::ErrorSeverity::Validation
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "STAT_TABLE_PARSE",
            Self::Tag(_) => "STAT_TABLE_TAG",
        }
    }
}

/// The stat-definition table.
///
/// Stats without an entry use [`AggregationMode::Sum`], base 0, and the
/// clamp bounds from [`FrameworkConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatTable {
    definitions: BTreeMap<TagId, StatDefinition>,
    fallback: StatDefinition,
}

impl StatTable {
    pub fn new(config: &FrameworkConfig) -> Self {
        Self {
            definitions: BTreeMap::new(),
            fallback: StatDefinition::sum()
                .with_bounds(config.default_stat_min, config.default_stat_max),
        }
    }

    /// Adds or replaces the definition of `stat`.
    pub fn define(&mut self, stat: TagId, definition: StatDefinition) -> &mut Self {
        self.definitions.insert(stat, definition);
        self
    }

    #[must_use]
    pub fn with(mut self, stat: TagId, definition: StatDefinition) -> Self {
        self.define(stat, definition);
        self
    }

    /// Returns the definition of `stat`, or the fallback if it has none.
    pub fn definition(&self, stat: TagId) -> &StatDefinition {
        self.definitions.get(&stat).unwrap_or(&self.fallback)
    }

    pub fn is_defined(&self, stat: TagId) -> bool {
        self.definitions.contains_key(&stat)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagId, &StatDefinition)> {
        self.definitions.iter().map(|(tag, def)| (*tag, def))
    }

    /// Parses a RON map of tag path → definition, registering each path.
    ///
    /// ```ron
    /// {
    ///     "Stat.Power": (mode: Sum, base: 10),
    ///     "Stat.Speed": (mode: Layered, base: 100, max: 400),
    /// }
    /// ```
    #[cfg(feature = "serde")]
    pub fn from_ron(
        source: &str,
        registry: &TagRegistry,
        config: &FrameworkConfig,
    ) -> Result<Self, StatTableError> {
        let raw: BTreeMap<String, StatDefinition> =
            ron::from_str(source).map_err(|e| StatTableError::Parse(e.to_string()))?;

        let mut table = Self::new(config);
        for (path, definition) in raw {
            let stat = registry.register(&path)?;
            table.define(stat, definition);
        }
        Ok(table)
    }

    /// Registers every path with `registry` and returns the resulting table.
    pub fn from_paths<'a>(
        entries: impl IntoIterator<Item = (&'a str, StatDefinition)>,
        registry: &TagRegistry,
        config: &FrameworkConfig,
    ) -> Result<Self, StatTableError> {
        let mut table = Self::new(config);
        for (path, definition) in entries {
            table.define(registry.register(path)?, definition);
        }
        Ok(table)
    }
}

impl Default for StatTable {
    fn default() -> Self {
        Self::new(&FrameworkConfig::default())
    }
}
