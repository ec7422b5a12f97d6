//! Engine configuration.
//!
//! A plain struct with serde defaults, parseable from a TOML file in the
//! data directory. External configuration loading (environment, flags) is a
//! collaborator's concern; the engine only consumes the resolved values.

use crate::error::{EmberError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration for the Ember engine.
///
/// All intervals are plain integers in the unit their name states, so the
/// file reads the way operators write it:
///
/// ```toml
/// shard_count = 16
/// ttl_sweep_interval_secs = 60
/// checkpoint_interval_secs = 300
/// wal_enabled = true
/// cold_months = 6
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of shards per store; a power of two between 1 and 256.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Interval between TTL sweeps, in seconds.
    #[serde(default = "default_ttl_sweep_secs")]
    pub ttl_sweep_interval_secs: u64,

    /// Interval between checkpoints, in seconds.
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_interval_secs: u64,

    /// Whether the periodic checkpointer runs.
    #[serde(default = "default_true")]
    pub checkpoint_enabled: bool,

    /// Whether committed operations are written to the WAL.
    #[serde(default = "default_true")]
    pub wal_enabled: bool,

    /// Interval between backups, in seconds. The backup scheduler itself is
    /// external; the engine only exposes the value.
    #[serde(default = "default_backup_secs")]
    pub backup_interval_secs: u64,

    /// Backup retention, in seconds.
    #[serde(default = "default_backup_retention_secs")]
    pub backup_retention_secs: u64,

    /// Age in months after which documents are evicted from memory.
    /// Zero disables hot/cold tiering.
    #[serde(default)]
    pub cold_months: u32,

    /// Interval between cold-eviction passes, in hours.
    #[serde(default = "default_hot_eviction_hours")]
    pub hot_eviction_interval_hours: u64,

    /// Size of the worker pool external request handlers draw from.
    #[serde(default = "default_worker_pool")]
    pub worker_pool_size: usize,

    /// Age after which an ACTIVE transaction is rolled back by GC, in seconds.
    #[serde(default = "default_tx_timeout_secs")]
    pub tx_gc_timeout_secs: u64,

    /// Interval between abandoned-transaction scans, in seconds.
    #[serde(default = "default_tx_gc_interval_secs")]
    pub tx_gc_interval_secs: u64,

    /// Password the root user is seeded with on first startup.
    #[serde(default = "default_root_password")]
    pub root_password: String,

    /// Password the admin user is seeded with on first startup.
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
}

fn default_shard_count() -> usize {
    16
}
fn default_ttl_sweep_secs() -> u64 {
    60
}
fn default_checkpoint_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_backup_secs() -> u64 {
    3_600
}
fn default_backup_retention_secs() -> u64 {
    7 * 24 * 3_600
}
fn default_hot_eviction_hours() -> u64 {
    24
}
fn default_worker_pool() -> usize {
    100
}
fn default_tx_timeout_secs() -> u64 {
    300
}
fn default_tx_gc_interval_secs() -> u64 {
    600
}
fn default_root_password() -> String {
    "root".to_string()
}
fn default_admin_password() -> String {
    "admin".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shard_count: default_shard_count(),
            ttl_sweep_interval_secs: default_ttl_sweep_secs(),
            checkpoint_interval_secs: default_checkpoint_secs(),
            checkpoint_enabled: true,
            wal_enabled: true,
            backup_interval_secs: default_backup_secs(),
            backup_retention_secs: default_backup_retention_secs(),
            cold_months: 0,
            hot_eviction_interval_hours: default_hot_eviction_hours(),
            worker_pool_size: default_worker_pool(),
            tx_gc_timeout_secs: default_tx_timeout_secs(),
            tx_gc_interval_secs: default_tx_gc_interval_secs(),
            root_password: default_root_password(),
            admin_password: default_admin_password(),
        }
    }
}

impl EngineConfig {
    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| EmberError::bad_request(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural constraints.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0
            || self.shard_count > 256
            || !self.shard_count.is_power_of_two()
        {
            return Err(EmberError::bad_request(format!(
                "shard_count must be a power of two in 1..=256, got {}",
                self.shard_count
            )));
        }
        if self.worker_pool_size == 0 {
            return Err(EmberError::bad_request("worker_pool_size must be nonzero"));
        }
        Ok(())
    }

    /// TTL sweep interval as a `Duration`.
    pub fn ttl_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ttl_sweep_interval_secs)
    }

    /// Checkpoint interval as a `Duration`.
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    /// Hot-eviction interval as a `Duration`.
    pub fn hot_eviction_interval(&self) -> Duration {
        Duration::from_secs(self.hot_eviction_interval_hours * 3_600)
    }

    /// Abandoned-transaction timeout as a `Duration`.
    pub fn tx_gc_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_gc_timeout_secs)
    }

    /// Abandoned-transaction scan interval as a `Duration`.
    pub fn tx_gc_interval(&self) -> Duration {
        Duration::from_secs(self.tx_gc_interval_secs)
    }

    /// Whether hot/cold tiering is active.
    pub fn tiering_enabled(&self) -> bool {
        self.cold_months > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.shard_count, 16);
        assert_eq!(c.ttl_sweep_interval_secs, 60);
        assert_eq!(c.checkpoint_interval_secs, 300);
        assert!(c.checkpoint_enabled);
        assert!(c.wal_enabled);
        assert_eq!(c.cold_months, 0);
        assert!(!c.tiering_enabled());
        assert_eq!(c.tx_gc_timeout_secs, 300);
        assert_eq!(c.tx_gc_interval_secs, 600);
        c.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let c = EngineConfig::from_toml("shard_count = 64\ncold_months = 6\n").unwrap();
        assert_eq!(c.shard_count, 64);
        assert_eq!(c.cold_months, 6);
        assert!(c.tiering_enabled());
        assert_eq!(c.worker_pool_size, 100);
    }

    #[test]
    fn test_invalid_shard_count_rejected() {
        assert!(EngineConfig::from_toml("shard_count = 12").is_err());
        assert!(EngineConfig::from_toml("shard_count = 0").is_err());
        assert!(EngineConfig::from_toml("shard_count = 512").is_err());
    }

    #[test]
    fn test_garbage_toml_rejected() {
        assert!(EngineConfig::from_toml("shard_count = [").is_err());
    }
}
