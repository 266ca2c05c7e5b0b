//! # TTL cache
//!
//! In-process key/value cache with per-entry expiration. Expired entries are
//! invisible to readers, evicted lazily on `get`/`has`, and removed in bulk by a
//! periodic sweep so that keys written once and never read again do not pile up.
//!
//! Time is read from [`tokio::time::Instant`], so tests can drive expiry with a
//! paused runtime clock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default entry lifetime: 2 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default interval between background sweeps: 30 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Commonly used lifetimes.
pub mod ttl {
    use std::time::Duration;

    pub const TWO_HOURS: Duration = Duration::from_secs(2 * 60 * 60);
    pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
    pub const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);
    pub const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
    pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
}

/// Cache key composed of a resource-kind prefix and ordered parts,
/// rendered as `prefix:part1:part2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<I, S>(prefix: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::from(prefix);
        for part in parts {
            key.push(':');
            key.push_str(part.as_ref());
        }
        Self(key)
    }

    pub fn repo(owner: &str, repo: &str) -> Self {
        Self::new("repo", [owner, repo])
    }

    pub fn user(username: &str) -> Self {
        Self::new("user", [username])
    }

    pub fn user_year(username: &str, year: i32) -> Self {
        Self::new("user-year", [username.to_string(), year.to_string()])
    }

    pub fn user_repos<I, S>(username: &str, query: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = Self::new("user-repos", [username]);
        for part in query {
            key.0.push(':');
            key.0.push_str(part.as_ref());
        }
        key
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Stored value and its lifetime bounds.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    /// Age of the oldest entry in whole seconds.
    pub oldest_entry_secs: Option<u64>,
}

/// Outcome of a lookup that tolerates expired entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Fresh(V),
    /// Expired but not yet evicted.
    Stale(V),
    Absent,
}

/// A TTL cache shared by cloning; clones see the same entries.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
    default_ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Inserts or overwrites `key` with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Inserts or overwrites `key`, expiring `ttl` from now.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
        };
        self.entries.lock().insert(key.into(), entry);
    }

    /// Whether `key` holds a live entry. Evicts it if expired.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            entries.remove(key);
        }
        !expired
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock();
        let expired_entries = entries.values().filter(|e| e.is_expired(now)).count();
        let oldest_entry_secs = entries
            .values()
            .map(|e| now.saturating_duration_since(e.created_at).as_secs())
            .max();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: entries.len() - expired_entries,
            expired_entries,
            oldest_entry_secs,
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Returns the live value for `key`. An expired entry is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Like [`get`](Self::get) but hands back expired values without evicting them.
    pub fn get_or_stale(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();
        match self.entries.lock().get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Stale(entry.value.clone()),
            Some(entry) => Lookup::Fresh(entry.value.clone()),
            None => Lookup::Absent,
        }
    }
}

impl<V: Send + 'static> TtlCache<V> {
    /// Spawns the periodic sweep. The returned handle owns the task.
    pub fn start_sweeper(&self, interval: Duration) -> SweeperHandle {
        let cache = self.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();
        // First deadline is fixed here, not when the task is first polled.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            info!(removed, "cache sweep removed expired entries");
                        } else {
                            debug!("cache sweep found nothing to remove");
                        }
                    }
                }
            }
        });
        SweeperHandle { token, handle }
    }
}

/// Running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
