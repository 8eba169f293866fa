//! Configuration for duokv
//!
//! Centralized engine configuration with sensible defaults.

use crate::error::{KvError, Result};
use crate::storage::expiry::ExpiryConfig;

/// Main configuration for a [`StoreEngine`](crate::storage::StoreEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // -------------------------------------------------------------------------
    // Store Configuration
    // -------------------------------------------------------------------------
    /// When false, object-store reads miss and object writes are refused
    pub object_store_enabled: bool,

    /// Cap on resident records per shard; beyond it records move to the
    /// on-disk tier. `None` keeps everything resident.
    pub resident_records_per_shard: Option<usize>,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Measure how long pending operations take to complete
    pub latency_tracking: bool,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// Number of lock-table stripes
    pub lock_stripes: usize,

    /// Number of watch version counters (rounded up to a power of two)
    pub watch_buckets: usize,

    // -------------------------------------------------------------------------
    // Expiry Configuration
    // -------------------------------------------------------------------------
    pub expiry: ExpiryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            object_store_enabled: true,
            resident_records_per_shard: None,
            latency_tracking: true,
            lock_stripes: 64,
            watch_buckets: 4096,
            expiry: ExpiryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Enable or disable the object store
    pub fn object_store_enabled(mut self, enabled: bool) -> Self {
        self.config.object_store_enabled = enabled;
        self
    }

    /// Limit the resident tier to `count` records per shard
    pub fn resident_records_per_shard(mut self, count: usize) -> Self {
        self.config.resident_records_per_shard = Some(count);
        self
    }

    /// Enable or disable pending-latency measurement
    pub fn latency_tracking(mut self, enabled: bool) -> Self {
        self.config.latency_tracking = enabled;
        self
    }

    /// Set the number of lock-table stripes
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.config.lock_stripes = stripes;
        self
    }

    /// Set the number of watch version counters
    pub fn watch_buckets(mut self, buckets: usize) -> Self {
        self.config.watch_buckets = buckets;
        self
    }

    /// Set the expiry sweeper configuration
    pub fn expiry(mut self, expiry: ExpiryConfig) -> Self {
        self.config.expiry = expiry;
        self
    }

    /// Validate and return the config
    ///
    /// Fails with [`KvError::Config`] when a stripe or bucket count is zero
    /// or when the expiry interval bounds are inverted.
    pub fn build(self) -> Result<EngineConfig> {
        let config = self.config;
        if config.lock_stripes == 0 {
            return Err(KvError::Config("lock_stripes must be at least 1".into()));
        }
        if config.watch_buckets == 0 {
            return Err(KvError::Config("watch_buckets must be at least 1".into()));
        }
        config.expiry.validate()?;
        Ok(config)
    }
}
