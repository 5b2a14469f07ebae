use serde::{Deserialize, Serialize};

/// Limits and checkpointing policy for a [`DeltaEngine`](crate::DeltaEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// Largest payload any version may hold.
    pub max_payload_bytes: u64,
    /// Write a checkpoint every N versions. `0` disables checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 16 * 1024 * 1024,
            checkpoint_interval: 32,
        }
    }
}

impl DeltaConfig {
    pub fn should_checkpoint(&self, version: u64) -> bool {
        self.checkpoint_interval > 0 && version % self.checkpoint_interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DeltaConfig::default();
        assert_eq!(c.max_payload_bytes, 16 * 1024 * 1024);
        assert!(c.should_checkpoint(32));
        assert!(!c.should_checkpoint(33));
    }

    #[test]
    fn zero_interval_disables_checkpoints() {
        let c = DeltaConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(!c.should_checkpoint(0));
        assert!(!c.should_checkpoint(64));
    }
}
