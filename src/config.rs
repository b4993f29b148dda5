//! Configuration Module
//!
//! Server configuration loaded from environment variables, and the typed
//! cache configuration validated from it.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::expiry::{ExpiryPolicy, Policy};

// == Atomicity Mode ==
/// Durability contract of the cache, which also decides how TTL changes
/// reach replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtomicityMode {
    /// Replication is asynchronous to the client response
    #[default]
    Atomic,
    /// Replication is awaited; transactions are available
    Transactional,
}

impl FromStr for AtomicityMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" => Ok(AtomicityMode::Atomic),
            "transactional" => Ok(AtomicityMode::Transactional),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown atomicity mode '{}'",
                other
            ))),
        }
    }
}

// == Cache Config ==
/// Expiration-related settings of one cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Policy applied when a call supplies no override
    pub default_policy: Policy,
    pub atomicity: AtomicityMode,
    /// Background reclamation; when off, expired entries go only on access
    pub eager_ttl: bool,
    pub near_cache: bool,
    /// Sweeper wake-up interval
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_policy: Policy::Eternal,
            atomicity: AtomicityMode::Atomic,
            eager_ttl: true,
            near_cache: false,
            sweep_interval: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    pub fn with_policy(mut self, policy: impl Into<Policy>) -> Self {
        self.default_policy = policy.into();
        self
    }

    pub fn with_atomicity(mut self, atomicity: AtomicityMode) -> Self {
        self.atomicity = atomicity;
        self
    }

    pub fn with_eager_ttl(mut self, eager_ttl: bool) -> Self {
        self.eager_ttl = eager_ttl;
        self
    }

    pub fn with_near_cache(mut self, near_cache: bool) -> Self {
        self.near_cache = near_cache;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Whether replicas must acknowledge before a write completes.
    pub fn sync_replication(&self) -> bool {
        self.atomicity == AtomicityMode::Transactional
    }

    pub fn validate(&self) -> Result<()> {
        if self.eager_ttl && self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep interval must be positive when eager TTL is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// == Server Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Number of in-process cache nodes
    pub node_count: usize,
    /// Backup copies per key
    pub backups: usize,
    /// Number of hash partitions
    pub partitions: u32,
    /// Sweeper interval in milliseconds
    pub sweep_interval_ms: u64,
    pub eager_ttl: bool,
    pub near_cache: bool,
    /// `atomic` or `transactional`
    pub atomicity_mode: String,
    /// Default policy durations in milliseconds
    pub expiry_create_ms: Option<i64>,
    pub expiry_update_ms: Option<i64>,
    pub expiry_access_ms: Option<i64>,
    /// Use the eternal policy regardless of the durations above
    pub expiry_eternal: bool,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `NODE_COUNT` - In-process nodes (default: 3)
    /// - `BACKUPS` - Backup copies per key (default: 1)
    /// - `PARTITIONS` - Hash partitions (default: 64)
    /// - `SWEEP_INTERVAL_MS` - Sweeper interval (default: 100)
    /// - `EAGER_TTL` - Background reclamation (default: true)
    /// - `NEAR_CACHE` - Near copies on non-owner nodes (default: false)
    /// - `ATOMICITY_MODE` - `atomic` or `transactional` (default: atomic)
    /// - `EXPIRY_CREATE_MS`, `EXPIRY_UPDATE_MS`, `EXPIRY_ACCESS_MS` - default policy
    /// - `EXPIRY_ETERNAL` - use the eternal policy (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            node_count: env_or("NODE_COUNT", defaults.node_count),
            backups: env_or("BACKUPS", defaults.backups),
            partitions: env_or("PARTITIONS", defaults.partitions),
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            eager_ttl: env_or("EAGER_TTL", defaults.eager_ttl),
            near_cache: env_or("NEAR_CACHE", defaults.near_cache),
            atomicity_mode: env::var("ATOMICITY_MODE").unwrap_or(defaults.atomicity_mode),
            expiry_create_ms: env_opt("EXPIRY_CREATE_MS"),
            expiry_update_ms: env_opt("EXPIRY_UPDATE_MS"),
            expiry_access_ms: env_opt("EXPIRY_ACCESS_MS"),
            expiry_eternal: env_or("EXPIRY_ETERNAL", defaults.expiry_eternal),
        }
    }

    /// Default policy described by this configuration.
    ///
    /// # Errors
    /// Rejects negative durations.
    pub fn default_policy(&self) -> Result<Policy> {
        if self.expiry_eternal {
            return Ok(Policy::Custom(ExpiryPolicy::eternal()));
        }
        match (self.expiry_create_ms, self.expiry_update_ms, self.expiry_access_ms) {
            (None, None, None) => Ok(Policy::Eternal),
            (create, update, access) => {
                ExpiryPolicy::from_millis(create, update, access).map(Policy::Custom)
            }
        }
    }

    /// Validated cache configuration.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        let config = CacheConfig {
            default_policy: self.default_policy()?,
            atomicity: self.atomicity_mode.parse()?,
            eager_ttl: self.eager_ttl,
            near_cache: self.near_cache,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            node_count: 3,
            backups: 1,
            partitions: 64,
            sweep_interval_ms: 100,
            eager_ttl: true,
            near_cache: false,
            atomicity_mode: "atomic".to_string(),
            expiry_create_ms: None,
            expiry_update_ms: None,
            expiry_access_ms: None,
            expiry_eternal: false,
        }
    }
}
