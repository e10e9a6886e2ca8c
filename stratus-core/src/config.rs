//! Configuration surface for the Stratus cache core.

use std::time::Duration;

use crate::error::{CacheResult, ValidationError};

/// Default key namespace prefix.
pub const DEFAULT_KEY_PREFIX: &str = "cache:";

/// Default TTL applied when a caller does not supply one.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Hard cap on keys visited by a single pattern scan.
pub const DEFAULT_MAX_SCAN_KEYS: usize = 10_000;

/// Hard cap on SCAN pages per pattern scan.
pub const DEFAULT_MAX_SCAN_ITERATIONS: usize = 1_000;

/// COUNT hint handed to the store per SCAN page.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 100;

/// Keys deleted per DEL batch during invalidation.
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 100;

/// Default jitter as a fraction of the base TTL.
pub const DEFAULT_JITTER_PERCENT: f64 = 0.10;

/// Serialized payloads above this size are candidates for compression.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Configuration for the coalescing cache.
///
/// Construct with [`CacheConfig::default`], the `with_*` builders, or
/// [`CacheConfig::from_env`]. Call [`CacheConfig::validate`] before handing
/// the config to the cache; out-of-range values are programming errors and
/// surface as [`ValidationError`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prefix prepended to every logical key.
    pub key_prefix: String,
    /// TTL used when the caller does not supply one.
    pub default_ttl: Duration,
    /// Maximum keys visited by one pattern scan before it terminates early.
    pub max_scan_keys: usize,
    /// Maximum SCAN pages per pattern scan.
    pub max_scan_iterations: usize,
    /// COUNT hint per SCAN page.
    pub scan_page_size: usize,
    /// Keys per DEL batch during invalidation.
    pub delete_batch_size: usize,
    /// Whether to jitter effective TTLs.
    pub jitter_enabled: bool,
    /// Jitter magnitude as a fraction of the base TTL, in `[0, 1]`.
    pub jitter_percent: f64,
    /// Serialized payloads above this many bytes are compressed when the
    /// compressed form is genuinely smaller.
    pub compression_threshold: usize,
    /// How long a fetch lock lingers after a successful populate, to absorb
    /// near-simultaneous late arrivals.
    pub lock_grace: Duration,
    /// A lock older than this is reclaimed by the janitor regardless of
    /// call state.
    pub lock_stale_after: Duration,
    /// How often the janitor sweeps the lock registry.
    pub janitor_interval: Duration,
    /// Initial connection ping attempts before reporting unavailable.
    pub connect_retries: u32,
    /// Base backoff between connection attempts, doubled per attempt.
    pub connect_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_scan_keys: DEFAULT_MAX_SCAN_KEYS,
            max_scan_iterations: DEFAULT_MAX_SCAN_ITERATIONS,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            jitter_enabled: true,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            lock_grace: Duration::from_millis(250),
            lock_stale_after: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(5),
            connect_retries: 5,
            connect_backoff: Duration::from_millis(200),
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUS_KEY_PREFIX`: key namespace prefix (default: `cache:`)
    /// - `STRATUS_DEFAULT_TTL_SECS`: default TTL in seconds (default: 300)
    /// - `STRATUS_MAX_SCAN_KEYS`: scan key cap (default: 10000)
    /// - `STRATUS_JITTER_ENABLED`: TTL jitter on/off (default: true)
    /// - `STRATUS_JITTER_PERCENT`: jitter fraction (default: 0.10)
    /// - `STRATUS_COMPRESSION_THRESHOLD`: compression threshold in bytes
    ///   (default: 1024)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("STRATUS_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(secs) = env_parse::<u64>("STRATUS_DEFAULT_TTL_SECS") {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("STRATUS_MAX_SCAN_KEYS") {
            config.max_scan_keys = max;
        }
        if let Ok(enabled) = std::env::var("STRATUS_JITTER_ENABLED") {
            config.jitter_enabled = enabled.to_lowercase() != "false";
        }
        if let Some(percent) = env_parse::<f64>("STRATUS_JITTER_PERCENT") {
            config.jitter_percent = percent;
        }
        if let Some(threshold) = env_parse::<usize>("STRATUS_COMPRESSION_THRESHOLD") {
            config.compression_threshold = threshold;
        }

        config
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the per-scan key cap.
    pub fn with_max_scan_keys(mut self, max: usize) -> Self {
        self.max_scan_keys = max;
        self
    }

    /// Set the SCAN page size.
    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Enable or disable TTL jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    /// Set the jitter fraction.
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent;
        self
    }

    /// Set the compression threshold.
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Set the post-success lock grace window.
    pub fn with_lock_grace(mut self, grace: Duration) -> Self {
        self.lock_grace = grace;
        self
    }

    /// Set the lock staleness bound.
    pub fn with_lock_stale_after(mut self, bound: Duration) -> Self {
        self.lock_stale_after = bound;
        self
    }

    /// Check the config for out-of-range values.
    pub fn validate(&self) -> CacheResult<()> {
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ValidationError::InvalidConfig {
                field: "jitter_percent".to_string(),
                value: self.jitter_percent.to_string(),
                reason: "must be in [0, 1]".to_string(),
            }
            .into());
        }
        if self.scan_page_size == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "scan_page_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.delete_batch_size == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "delete_batch_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        if self.lock_stale_after < self.lock_grace {
            return Err(ValidationError::InvalidConfig {
                field: "lock_stale_after".to_string(),
                value: format!("{:?}", self.lock_stale_after),
                reason: "must be at least lock_grace".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.key_prefix, "cache:");
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert!(config.jitter_enabled);
    }

    #[test]
    fn test_builder_chain() {
        let config = CacheConfig::new()
            .with_key_prefix("app:")
            .with_default_ttl(Duration::from_secs(60))
            .with_max_scan_keys(500)
            .with_jitter(false)
            .with_compression_threshold(4096);

        assert_eq!(config.key_prefix, "app:");
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.max_scan_keys, 500);
        assert!(!config.jitter_enabled);
        assert_eq!(config.compression_threshold, 4096);
    }

    #[test]
    fn test_jitter_percent_out_of_range_rejected() {
        let config = CacheConfig::new().with_jitter_percent(1.5);
        assert!(config.validate().is_err());

        let config = CacheConfig::new().with_jitter_percent(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_sizes_rejected() {
        let config = CacheConfig::new().with_scan_page_size(0);
        assert!(config.validate().is_err());

        let mut config = CacheConfig::new();
        config.delete_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_bound_must_cover_grace() {
        let config = CacheConfig::new()
            .with_lock_grace(Duration::from_secs(10))
            .with_lock_stale_after(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }
}
