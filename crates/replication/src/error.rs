//! Unified error type of the replication layer.
use sf_core::{
    CardError, CardId, DeltaError, ErrorSeverity, FrameworkError, OwnerId, TagError, WorldError,
};
use thiserror::Error;

use crate::wire::ConnectionId;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Card(#[from] CardError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("failed to encode packet")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode packet")]
    Decode(#[source] bincode::Error),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("no view of {0}")]
    UnknownCard(CardId),

    #[error("tag manifest mismatch; connection refused")]
    TagManifestMismatch,

    #[error("prediction backlog full ({limit} pending)")]
    PredictionBacklogFull { limit: usize },

    #[error("{card} is not controlled by {owner}")]
    NotLocallyControlled { card: CardId, owner: OwnerId },

    #[error("link closed")]
    ChannelClosed,
}

impl FrameworkError for ReplicationError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::World(e) => e.severity(),
            Self::Card(e) => e.severity(),
            Self::Delta(e) => e.severity(),
            Self::Tag(e) => e.severity(),
            Self::Decode(_) => ErrorSeverity::Internal,
            Self::Encode(_) => ErrorSeverity::Internal,
            Self::UnknownConnection(_)
            | Self::UnknownCard(_)
            | Self::NotLocallyControlled { .. } => ErrorSeverity::Validation,
            Self::PredictionBacklogFull { .. } | Self::ChannelClosed => {
                ErrorSeverity::Recoverable
            }
            Self::TagManifestMismatch => ErrorSeverity::Validation,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::World(e) => e.error_code(),
            Self::Card(e) => e.error_code(),
            Self::Delta(e) => e.error_code(),
            Self::Tag(e) => e.error_code(),
            Self::Encode(_) => "REPLICATION_ENCODE",
            Self::Decode(_) => "REPLICATION_DECODE",
            Self::UnknownConnection(_) => "REPLICATION_UNKNOWN_CONNECTION",
            Self::UnknownCard(_) => "REPLICATION_UNKNOWN_CARD",
            Self::TagManifestMismatch => "REPLICATION_TAG_MANIFEST_MISMATCH",
            Self::PredictionBacklogFull { .. } => "REPLICATION_PREDICTION_BACKLOG_FULL",
            Self::NotLocallyControlled { .. } => "REPLICATION_NOT_LOCALLY_CONTROLLED",
            Self::ChannelClosed => "REPLICATION_CHANNEL_CLOSED",
        }
    }
}
