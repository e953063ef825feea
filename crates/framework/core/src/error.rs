//! Common error infrastructure for sf-core.
//!
//! Domain errors (`TagError`, `CardError`, `StatError`, `DeltaError`) live
//! next to the code that raises them. This module only holds the shared
//! classification used by logging and by the replication layer when it
//! decides between "reject and continue" and "resynchronize".
//!
//! Nothing in the framework is fatal to the process: the worst outcome of
//! any error is a full Card resynchronization.

use crate::state::{CardId, SlotableId, Version};

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// The call was rejected; state is unchanged and the caller may retry
    /// with a different request.
    ///
    /// Examples: slot occupied, card full, stale contribution
    Recoverable,

    /// Invalid input that should not be retried unchanged.
    ///
    /// Examples: malformed tag path, index out of range
    Validation,

    /// An internal inconsistency was detected. The affected Card is
    /// resynchronized rather than repaired.
    ///
    /// Examples: sequence gap, digest mismatch after applying a delta
    Internal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Validation => "validation",
            Self::Internal => "internal",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }

    /// Returns true if this error indicates desynchronization or a bug.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

/// Contextual information attached to errors for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorContext {
    /// Card involved in the failure (if applicable).
    pub card: Option<CardId>,

    /// Slotable involved in the failure (if applicable).
    pub slotable: Option<SlotableId>,

    /// Snapshot version the failure was observed at (if applicable).
    pub version: Option<Version>,

    /// Optional static message providing additional context.
    pub message: Option<&'static str>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            card: None,
            slotable: None,
            version: None,
            message: None,
        }
    }

    #[must_use]
    pub const fn with_card(mut self, card: CardId) -> Self {
        self.card = Some(card);
        self
    }

    #[must_use]
    pub const fn with_slotable(mut self, slotable: SlotableId) -> Self {
        self.slotable = Some(slotable);
        self
    }

    #[must_use]
    pub const fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

/// Common trait for all framework errors.
///
/// - All error enums implement this trait
/// - Use `#[derive(thiserror::Error)]` for Display/Error impl
/// - Classify severity based on recoverability, not impact
pub trait FrameworkError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns the context information for this error, if available.
    fn context(&self) -> Option<&ErrorContext> {
        None
    }

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_severity_is_internal() {
        let levels = [
            ErrorSeverity::Recoverable,
            ErrorSeverity::Validation,
            ErrorSeverity::Internal,
        ];
        let names: Vec<_> = levels.iter().map(ErrorSeverity::as_str).collect();
        assert_eq!(names, ["recoverable", "validation", "internal"]);
        assert_eq!(levels.iter().filter(|s| s.is_internal()).count(), 1);
        assert!(ErrorSeverity::Recoverable.is_recoverable());
    }
}
