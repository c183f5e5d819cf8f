//! Response cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_SHARDS: usize = 16;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store computed responses. When off, concurrent misses are still
    /// coalesced but nothing outlives its computation.
    pub enabled: bool,
    /// Maximum age of a stored response.
    pub ttl_seconds: u64,
    /// Upper bound on stored responses across all shards.
    pub capacity: usize,
    /// Number of independently locked LRU shards.
    pub shards: usize,
    /// Cadence of the background expiry sweep.
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_TTL_SECS,
            capacity: DEFAULT_CAPACITY,
            shards: DEFAULT_SHARDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_seconds: settings.ttl.as_secs(),
            capacity: settings.capacity.get(),
            shards: settings.shards.get(),
            sweep_interval_seconds: settings.sweep_interval.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Shard count clamped to `[1, capacity]` so no shard is empty.
    pub fn shard_count(&self) -> usize {
        self.shards.clamp(1, self.capacity.max(1))
    }

    /// Per-shard LRU bound; the shards together hold at least `capacity`.
    pub fn shard_capacity(&self) -> NonZeroUsize {
        let per_shard = self.capacity.max(1).div_ceil(self.shard_count());
        NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.shard_count(), 16);
        assert_eq!(config.shard_capacity().get(), 64);
    }

    #[test]
    fn shards_never_exceed_capacity() {
        let config = CacheConfig {
            capacity: 3,
            shards: 16,
            ..Default::default()
        };
        assert_eq!(config.shard_count(), 3);
        assert_eq!(config.shard_capacity().get(), 1);
    }

    #[test]
    fn zero_values_clamp_to_min() {
        let config = CacheConfig {
            capacity: 0,
            shards: 0,
            sweep_interval_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.shard_count(), 1);
        assert_eq!(config.shard_capacity().get(), 1);
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
