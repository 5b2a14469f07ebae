use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use weft_content::{ContentConfig, ReaperConfig};
use weft_dag::PropagationConfig;
use weft_delta::DeltaConfig;

use crate::error::{WeftError, WeftResult};

/// Top-level configuration, loadable from TOML. Missing sections and
/// fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    pub limits: LimitsConfig,
    pub content: ContentSection,
    pub delta: DeltaSection,
    pub dag: DagSection,
    pub events: EventsSection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_payload_bytes: u64,
    /// Attempts per write when a concurrent writer wins the version race.
    pub max_conflict_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 16 * 1024 * 1024,
            max_conflict_retries: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSection {
    pub compression_level: i32,
    pub min_compress_bytes: usize,
    /// Unreferenced content survives this long before it can be reaped.
    pub gc_grace_period_ms: u64,
    pub warm_after_ms: u64,
    pub cold_after_ms: u64,
    /// How often the background reaper runs.
    pub reaper_interval_ms: u64,
    pub cold_dir: Option<PathBuf>,
}

impl Default for ContentSection {
    fn default() -> Self {
        Self {
            compression_level: 3,
            min_compress_bytes: 64,
            gc_grace_period_ms: 5 * 60 * 1000,
            warm_after_ms: 10 * 60 * 1000,
            cold_after_ms: 60 * 60 * 1000,
            reaper_interval_ms: 60 * 1000,
            cold_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaSection {
    /// Checkpoint every N versions; `0` disables checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for DeltaSection {
    fn default() -> Self {
        Self {
            checkpoint_interval: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagSection {
    pub cache_ttl_ms: u64,
    pub max_concurrency: usize,
    pub node_timeout_ms: u64,
}

impl Default for DagSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30 * 1000,
            max_concurrency: 8,
            node_timeout_ms: 30 * 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Per-subscriber broadcast buffer.
    pub channel_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl WeftConfig {
    pub fn from_toml_str(source: &str) -> WeftResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> WeftResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| WeftError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> WeftResult<String> {
        toml::to_string_pretty(self).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> WeftResult<()> {
        let bad = |msg: &str| Err(WeftError::Config(msg.into()));
        if self.limits.max_payload_bytes == 0 {
            return bad("limits.max_payload_bytes must be positive");
        }
        if self.limits.max_conflict_retries == 0 {
            return bad("limits.max_conflict_retries must be at least 1");
        }
        if !(1..=22).contains(&self.content.compression_level) {
            return bad("content.compression_level must be within 1..=22");
        }
        if self.content.cold_after_ms < self.content.warm_after_ms {
            return bad("content.cold_after_ms must not be below warm_after_ms");
        }
        if self.content.reaper_interval_ms == 0 {
            return bad("content.reaper_interval_ms must be positive");
        }
        if self.dag.max_concurrency == 0 {
            return bad("dag.max_concurrency must be at least 1");
        }
        if self.dag.node_timeout_ms == 0 {
            return bad("dag.node_timeout_ms must be positive");
        }
        if self.events.channel_capacity == 0 {
            return bad("events.channel_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn content_config(&self) -> ContentConfig {
        ContentConfig {
            compression_level: self.content.compression_level,
            min_compress_bytes: self.content.min_compress_bytes,
            cold_dir: self.content.cold_dir.clone(),
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_millis(self.content.reaper_interval_ms),
            grace: self.gc_grace_period(),
            warm_after: Duration::from_millis(self.content.warm_after_ms),
            cold_after: Duration::from_millis(self.content.cold_after_ms),
        }
    }

    pub fn delta_config(&self) -> DeltaConfig {
        DeltaConfig {
            max_payload_bytes: self.limits.max_payload_bytes,
            checkpoint_interval: self.delta.checkpoint_interval,
        }
    }

    pub fn propagation_config(&self) -> PropagationConfig {
        PropagationConfig {
            max_concurrency: self.dag.max_concurrency,
            node_timeout: Duration::from_millis(self.dag.node_timeout_ms),
            conflict_retries: self.limits.max_conflict_retries,
        }
    }

    pub fn gc_grace_period(&self) -> Duration {
        Duration::from_millis(self.content.gc_grace_period_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.dag.cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = WeftConfig::default();
        assert_eq!(c.limits.max_payload_bytes, 16 * 1024 * 1024);
        assert_eq!(c.limits.max_conflict_retries, 5);
        assert_eq!(c.content.compression_level, 3);
        assert_eq!(c.gc_grace_period(), Duration::from_secs(300));
        assert_eq!(c.delta.checkpoint_interval, 32);
        assert_eq!(c.cache_ttl(), Duration::from_secs(30));
        assert_eq!(c.dag.max_concurrency, 8);
        assert_eq!(c.events.channel_capacity, 1024);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = WeftConfig::from_toml_str(
            r#"
            [limits]
            max_payload_bytes = 1024

            [dag]
            node_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(c.limits.max_payload_bytes, 1024);
        assert_eq!(c.limits.max_conflict_retries, 5);
        assert_eq!(
            c.propagation_config().node_timeout,
            Duration::from_millis(250)
        );
        assert_eq!(c.delta_config().max_payload_bytes, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = WeftConfig::from_toml_str("[dag]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, WeftError::Config(_)));
        assert!(WeftConfig::from_toml_str("[limits]\nmax_payload_bytes = \"big\"\n").is_err());
    }

    #[test]
    fn toml_roundtrip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        let mut config = WeftConfig::default();
        config.content.cold_dir = Some(dir.path().join("cold"));
        config.delta.checkpoint_interval = 0;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = WeftConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(WeftConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
