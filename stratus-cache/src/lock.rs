//! Fetch-lock registry for request coalescing.
//!
//! The registry is the only mutable structure shared between concurrent
//! callers. Each entry wraps one in-flight populate call as a clonable
//! shared future: the first caller to miss a key becomes the leader and
//! drives the call, every later caller for the same key becomes a waiter
//! on the same outcome. The entry API makes join-or-lead atomic, so two
//! simultaneous misses can never both lead.
//!
//! Candidates are lazy: a caller builds its populate future up front,
//! shares it, and offers it to the registry. The future starts executing
//! only when polled, which only happens if the candidate actually became
//! the lock for its key — losing candidates are dropped without ever
//! running.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use stratus_core::CacheError;

/// The shared outcome of one in-flight populate call.
pub type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, CacheError>>>;

/// Box and share a populate future without starting it.
pub fn share_outcome<T, Fut>(fut: Fut) -> SharedOutcome<T>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
{
    fut.boxed().shared()
}

/// One in-flight populate call, keyed by cache key.
#[derive(Debug)]
struct FetchLock<T: Clone> {
    shared: SharedOutcome<T>,
    created_at: Instant,
}

/// Result of offering a candidate to the registry.
pub enum JoinOutcome<T: Clone> {
    /// The candidate became the lock; the offering caller owns driving it.
    Leader,
    /// Another caller's populate is in flight; await this outcome instead.
    Waiter(SharedOutcome<T>),
}

/// Registry of in-flight populate calls.
#[derive(Debug, Default)]
pub struct LockRegistry<T: Clone> {
    locks: DashMap<String, FetchLock<T>>,
}

impl<T> LockRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Atomically install `candidate` as the lock for `key`, or join the
    /// lock already in flight.
    pub fn join_or_lead(&self, key: &str, candidate: &SharedOutcome<T>) -> JoinOutcome<T> {
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(entry) => JoinOutcome::Waiter(entry.get().shared.clone()),
            Entry::Vacant(entry) => {
                entry.insert(FetchLock {
                    shared: candidate.clone(),
                    created_at: Instant::now(),
                });
                JoinOutcome::Leader
            }
        }
    }

    /// The shared outcome for `key`, if a populate is in flight.
    pub fn get(&self, key: &str) -> Option<SharedOutcome<T>> {
        self.locks.get(key).map(|lock| lock.shared.clone())
    }

    /// Drop the lock for `key`. Returns true if a lock existed.
    pub fn remove(&self, key: &str) -> bool {
        self.locks.remove(key).is_some()
    }

    /// Drop the lock for `key` only if it still wraps `shared`.
    ///
    /// Removal by key alone is unsafe for late or concurrent releases: the
    /// janitor may have reclaimed this lock and a new leader installed a
    /// fresh one under the same key, and a bare `remove` would delete the
    /// successor's live lock. The identity check makes such removals no-ops.
    pub fn remove_if(&self, key: &str, shared: &SharedOutcome<T>) -> bool {
        self.locks
            .remove_if(key, |_, lock| lock.shared.ptr_eq(shared))
            .is_some()
    }

    /// Number of in-flight populate calls.
    pub fn active(&self) -> usize {
        self.locks.len()
    }

    /// Remove every lock older than `stale_after`, returning how many were
    /// reclaimed. This is the backstop against a populate that never
    /// resolves: without it a hung dependency would deadlock the key
    /// permanently.
    pub fn sweep(&self, stale_after: Duration) -> usize {
        let mut reclaimed = 0;
        self.locks.retain(|_, lock| {
            if lock.created_at.elapsed() > stale_after {
                reclaimed += 1;
                false
            } else {
                true
            }
        });
        reclaimed
    }
}
