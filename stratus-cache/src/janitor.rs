//! Lock janitor background task.
//!
//! A populate call that never resolves would leak its fetch lock and
//! deadlock its key for every future caller. The janitor periodically
//! sweeps the lock registry and reclaims any lock older than the staleness
//! bound, regardless of call state. The bound must be short enough to
//! limit the blast radius of a hung dependency but long enough not to
//! reclaim legitimately slow populates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::lock::LockRegistry;

/// Configuration for the lock janitor.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// How often to sweep the registry.
    pub sweep_interval: Duration,
    /// Locks older than this are reclaimed.
    pub lock_stale_after: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            lock_stale_after: Duration::from_secs(30),
        }
    }
}

impl JanitorConfig {
    /// Derive janitor settings from the cache config.
    pub fn from_cache_config(config: &stratus_core::CacheConfig) -> Self {
        Self {
            sweep_interval: config.janitor_interval,
            lock_stale_after: config.lock_stale_after,
        }
    }
}

/// Counters tracking janitor activity.
#[derive(Debug, Default)]
pub struct JanitorMetrics {
    /// Total sweep cycles completed.
    pub sweep_cycles: AtomicU64,
    /// Total stale locks reclaimed since startup.
    pub locks_reclaimed: AtomicU64,
}

impl JanitorMetrics {
    /// Create a fresh metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a current snapshot of all counters.
    pub fn snapshot(&self) -> JanitorSnapshot {
        JanitorSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            locks_reclaimed: self.locks_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of janitor counters at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct JanitorSnapshot {
    pub sweep_cycles: u64,
    pub locks_reclaimed: u64,
}

/// Background task that reclaims stale fetch locks.
///
/// Runs until the shutdown signal is received.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(lock_janitor_task(
///     cache.lock_registry(),
///     JanitorConfig::from_cache_config(cache.config()),
///     shutdown_rx,
/// ));
///
/// // Later, on shutdown:
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn lock_janitor_task<T>(
    registry: Arc<LockRegistry<T>>,
    config: JanitorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<JanitorMetrics>
where
    T: Clone + Send + Sync + 'static,
{
    let metrics = Arc::new(JanitorMetrics::new());

    let mut sweep_interval = interval(config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        lock_stale_after_secs = config.lock_stale_after.as_secs(),
        "Lock janitor started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Lock janitor shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
                let reclaimed = registry.sweep(config.lock_stale_after);
                if reclaimed > 0 {
                    metrics.locks_reclaimed.fetch_add(reclaimed as u64, Ordering::Relaxed);
                    tracing::warn!(reclaimed, "Reclaimed stale fetch locks");
                } else {
                    tracing::trace!("Janitor sweep found no stale locks");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        locks_reclaimed = snapshot.locks_reclaimed,
        "Lock janitor stopped"
    );

    metrics
}
