//! # Configuration
//!
//! Engine settings. Every field has a default, so an empty JSON object is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Engine configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Maximum number of resolution results kept in the cache.
    pub cache_capacity: usize,

    /// Seconds a cached resolution result stays fresh.
    pub cache_ttl_secs: u64,

    /// Seconds to wait for a registry call before failing.
    pub request_timeout_secs: u64,

    /// Number of consecutive unpublished indexes probed beyond the last known
    /// index when synchronizing a root identity.
    pub sync_lookahead: u32,

    /// Key-derivation cost for store and archive passwords.
    pub kdf: KdfParams,
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,

    /// Number of iterations.
    pub iterations: u32,

    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            cache_ttl_secs: 600,
            request_timeout_secs: 30,
            sync_lookahead: 20,
            kdf: KdfParams::default(),
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Config {
    /// Load configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the cache capacity.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the cache time-to-live in seconds.
    #[must_use]
    pub const fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// Set the registry call timeout in seconds.
    #[must_use]
    pub const fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the synchronization lookahead.
    #[must_use]
    pub const fn sync_lookahead(mut self, lookahead: u32) -> Self {
        self.sync_lookahead = lookahead;
        self
    }

    /// Set the key-derivation cost.
    #[must_use]
    pub const fn kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub(crate) const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub(crate) const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_json("{}").expect("should parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.sync_lookahead, 20);
    }

    #[test]
    fn partial_override() {
        let config = Config::from_json(r#"{"cacheCapacity": 8, "kdf": {"memoryKib": 64}}"#)
            .expect("should parse");
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.kdf.memory_kib, 64);
        assert_eq!(config.kdf.iterations, 2);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
