//! TTL jitter policy.
//!
//! Keys written in a burst would otherwise expire in a burst, turning one
//! stampede into a delayed second one. Jitter desynchronizes mass expiry by
//! spreading effective TTLs uniformly around the base.

use std::time::Duration;

use rand::Rng;

/// Computes effective expiry from a base TTL plus bounded random jitter.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    jitter_enabled: bool,
    jitter_percent: f64,
}

impl TtlPolicy {
    /// Create a policy. `jitter_percent` is a fraction of the base TTL in
    /// `[0, 1]`; it is only consulted while jitter is enabled.
    pub fn new(jitter_enabled: bool, jitter_percent: f64) -> Self {
        Self {
            jitter_enabled,
            jitter_percent,
        }
    }

    /// Effective TTL: `base ± uniform(base * jitter_percent)`, floored at
    /// one second.
    pub fn effective_ttl(&self, base: Duration) -> Duration {
        if !self.jitter_enabled || self.jitter_percent == 0.0 {
            return base.max(Duration::from_secs(1));
        }

        let base_secs = base.as_secs_f64();
        let spread = base_secs * self.jitter_percent;
        let offset = rand::rng().random_range(-spread..=spread);
        let jittered = (base_secs + offset).max(1.0);
        Duration::from_secs_f64(jittered)
    }
}
