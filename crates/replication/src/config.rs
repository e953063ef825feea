use serde::{Deserialize, Serialize};

/// Tunables of the replication server and client sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Ticks to wait for an acknowledgment before resending a Card's delta.
    pub resend_after_ticks: u64,
    /// Unconfirmed predictions a client may hold before `predict` fails.
    pub max_pending_predictions: usize,
    /// Actions applied per connection per tick; the rest wait in order.
    pub max_actions_per_tick: usize,
    /// Compute per-connection deltas on the rayon pool.
    pub parallel_diff: bool,
    /// Check state digests after applying deltas on the client.
    pub verify_digests: bool,
    /// Capacity of each event bus topic.
    pub event_buffer_size: usize,
}

impl ReplicationConfig {
    pub const DEFAULT_RESEND_AFTER_TICKS: u64 = 8;
    pub const DEFAULT_MAX_PENDING_PREDICTIONS: usize = 64;
    pub const DEFAULT_MAX_ACTIONS_PER_TICK: usize = 32;
    pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

    /// Parses a RON document; missing fields keep their defaults.
    pub fn from_ron(source: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(source)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            resend_after_ticks: Self::DEFAULT_RESEND_AFTER_TICKS,
            max_pending_predictions: Self::DEFAULT_MAX_PENDING_PREDICTIONS,
            max_actions_per_tick: Self::DEFAULT_MAX_ACTIONS_PER_TICK,
            parallel_diff: true,
            verify_digests: true,
            event_buffer_size: Self::DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = ReplicationConfig::from_ron("(resend_after_ticks: 2)").unwrap();
        assert_eq!(config.resend_after_ticks, 2);
        assert_eq!(config.max_actions_per_tick, 32);
        assert!(config.verify_digests);

        let config: ReplicationConfig =
            serde_json::from_str(r#"{ "parallel_diff": false }"#).unwrap();
        assert!(!config.parallel_diff);
        assert_eq!(config.max_pending_predictions, 64);
    }
}
