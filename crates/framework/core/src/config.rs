/// Framework configuration constants and tunable parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameworkConfig {
    /// Lower clamp for stats that have no entry in the stat table.
    pub default_stat_min: i64,

    /// Upper clamp for stats that have no entry in the stat table.
    pub default_stat_max: i64,
}

impl FrameworkConfig {
    // ===== compile-time constants =====
    /// Largest capacity a Card may be created with.
    pub const MAX_CARD_CAPACITY: usize = 127;
    pub const MIN_CARD_CAPACITY: usize = 1;

    // ===== runtime-tunable defaults =====
    pub const DEFAULT_STAT_MIN: i64 = 0;
    pub const DEFAULT_STAT_MAX: i64 = 999_999;

    pub fn new() -> Self {
        Self {
            default_stat_min: Self::DEFAULT_STAT_MIN,
            default_stat_max: Self::DEFAULT_STAT_MAX,
        }
    }

    pub fn with_stat_bounds(min: i64, max: i64) -> Self {
        Self {
            default_stat_min: min.min(max),
            default_stat_max: max.max(min),
        }
    }

    /// Clamps a requested capacity into `MIN_CARD_CAPACITY..=MAX_CARD_CAPACITY`.
    pub const fn clamp_capacity(capacity: usize) -> usize {
        if capacity < Self::MIN_CARD_CAPACITY {
            Self::MIN_CARD_CAPACITY
        } else if capacity > Self::MAX_CARD_CAPACITY {
            Self::MAX_CARD_CAPACITY
        } else {
            capacity
        }
    }
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self::new()
    }
}
