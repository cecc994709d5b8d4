//! Request Rate Limiting
//!
//! Fixed-window request counters keyed by caller identity, plus one global
//! counter, to keep a public relay from being used as a free proxy.
//!
//! # Design
//!
//! - The first hit for a key opens a window; up to `limit` hits are allowed
//!   within it and later hits are denied until it expires
//! - Expired windows are replaced lazily on the next hit, and purged in bulk
//!   by a periodic sweeper
//! - The table is bounded: inserting a new key at capacity evicts the
//!   least-recently-accessed key
//! - Per-key updates go through the `DashMap` entry lock, so unrelated keys
//!   never contend
//!
//! # Usage
//!
//! ```
//! use relay_core::rate_limit::{CompositeRateLimiter, RateLimitConfig};
//!
//! let limiter = CompositeRateLimiter::new(
//!     RateLimitConfig::new().with_per_caller_limit(10).with_global_limit(1000),
//! );
//! let decision = limiter.check("203.0.113.7");
//! assert!(decision.allowed);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Key the global counter is stored under
const GLOBAL_KEY: &str = "global";

// =============================================================================
// Configuration
// =============================================================================

/// Limits for the per-caller and global counters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether limiting is applied at all
    pub enabled: bool,
    /// Requests per caller per window
    pub per_caller_limit: u32,
    /// Requests across all callers per window
    pub global_limit: u32,
    /// Window length
    pub window: Duration,
    /// Maximum tracked caller keys
    pub max_entries: usize,
    /// How often expired entries are purged
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_caller_limit: 20,
            global_limit: 1000,
            window: Duration::from_secs(60),
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-caller limit
    #[must_use]
    pub fn with_per_caller_limit(mut self, limit: u32) -> Self {
        self.per_caller_limit = limit;
        self
    }

    /// Set the global limit
    #[must_use]
    pub fn with_global_limit(mut self, limit: u32) -> Self {
        self.global_limit = limit;
        self
    }

    /// Set the window length
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the maximum number of tracked keys
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the sweep interval
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable limiting
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Which counter produced a decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitScope {
    /// The caller's own counter
    Caller,
    /// The shared global counter
    Global,
}

/// Outcome of a rate limit check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Limit of the counter that decided
    pub limit: u32,
    /// Hits left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_in: Duration,
    /// Counter that decided
    pub scope: LimitScope,
}

impl RateLimitDecision {
    /// Window reset as unix seconds, rounded up
    #[must_use]
    pub fn reset_at_unix(&self) -> i64 {
        let reset_in = chrono::Duration::from_std(self.reset_in).unwrap_or(chrono::Duration::zero());
        let reset_at = chrono::Utc::now() + reset_in;
        let secs = reset_at.timestamp();
        if reset_at.timestamp_subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Seconds a denied caller should wait, at least one
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        let secs = if self.reset_in.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}

// =============================================================================
// Fixed-Window Limiter
// =============================================================================

/// Counter state for one key
#[derive(Clone, Copy, Debug)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
    last_accessed: Instant,
}

/// One bounded table of fixed-window counters
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    max_entries: usize,
    enabled: bool,
    scope: LimitScope,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(limit: u32, window: Duration, max_entries: usize) -> Self {
        Self {
            limit,
            window,
            max_entries: max_entries.max(1),
            enabled: true,
            scope: LimitScope::Caller,
            entries: DashMap::new(),
        }
    }

    /// Enable or disable the limiter
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    fn with_scope(mut self, scope: LimitScope) -> Self {
        self.scope = scope;
        self
    }

    /// Count a hit for `key` now
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Count a hit for `key` at `now`
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if !self.enabled {
            return self.decision(true, self.limit, Duration::ZERO);
        }

        let mut inserted = false;
        let decision = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
                inserted = true;
                RateLimitEntry {
                    count: 0,
                    window_reset_at: now + self.window,
                    last_accessed: now,
                }
            });

            if now >= entry.window_reset_at {
                entry.count = 0;
                entry.window_reset_at = now + self.window;
            }
            entry.last_accessed = now;
            let reset_in = entry.window_reset_at.saturating_duration_since(now);

            if entry.count < self.limit {
                entry.count += 1;
                let remaining = self.limit - entry.count;
                self.decision(true, remaining, reset_in)
            } else {
                self.decision(false, 0, reset_in)
            }
        };

        // Trim only once the entry guard is gone; iterating its shard would deadlock.
        if inserted {
            self.trim_to_capacity(key, now);
        }
        decision
    }

    /// Undo one hit for `key` in its current window
    pub fn rollback(&self, key: &str) {
        self.rollback_at(key, Instant::now());
    }

    /// Undo one hit for `key` as of `now`
    pub fn rollback_at(&self, key: &str, now: Instant) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if now < entry.window_reset_at && entry.count > 0 {
                entry.count -= 1;
            }
        }
    }

    /// Hits counted for `key` in its live window
    #[must_use]
    pub fn count_at(&self, key: &str, now: Instant) -> u32 {
        self.entries
            .get(key)
            .filter(|entry| now < entry.window_reset_at)
            .map_or(0, |entry| entry.count)
    }

    /// Remove every expired entry, returning how many were removed
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.window_reset_at);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured limit
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Bring the table back to `max_entries` after `keep` was inserted
    ///
    /// Expired windows go first so a full table of stale callers costs one
    /// pass; only then are live entries evicted oldest-access first. Each
    /// racing inserter trims after itself, so the bound holds once every
    /// concurrent `check_at` has returned.
    fn trim_to_capacity(&self, keep: &str, now: Instant) {
        if self.entries.len() <= self.max_entries {
            return;
        }

        let swept = self.sweep_at(now);
        if swept > 0 {
            tracing::debug!(swept, "Swept expired rate limit entries at capacity");
        }

        while self.entries.len() > self.max_entries {
            if !self.evict_lru(keep) {
                break;
            }
        }
    }

    fn evict_lru(&self, keep: &str) -> bool {
        // Collect first: removing while an iterator guard is alive deadlocks the shard.
        let oldest = self
            .entries
            .iter()
            .filter(|item| item.key() != keep)
            .min_by_key(|item| item.value().last_accessed)
            .map(|item| item.key().clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                tracing::debug!(key = %key, "Evicted least-recently-used rate limit entry");
                true
            }
            None => false,
        }
    }

    fn decision(&self, allowed: bool, remaining: u32, reset_in: Duration) -> RateLimitDecision {
        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining,
            reset_in,
            scope: self.scope,
        }
    }
}

// =============================================================================
// Composite Limiter
// =============================================================================

/// Per-caller limiter in front of a global limiter
#[derive(Debug)]
pub struct CompositeRateLimiter {
    per_caller: RateLimiter,
    global: RateLimiter,
    sweep_interval: Duration,
}

impl CompositeRateLimiter {
    /// Create from configuration
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            per_caller: RateLimiter::new(config.per_caller_limit, config.window, config.max_entries)
                .with_enabled(config.enabled),
            global: RateLimiter::new(config.global_limit, config.window, 1)
                .with_enabled(config.enabled)
                .with_scope(LimitScope::Global),
            sweep_interval: config.sweep_interval,
        }
    }

    /// Check a caller now
    pub fn check(&self, caller: &str) -> RateLimitDecision {
        self.check_at(caller, Instant::now())
    }

    /// Check a caller at `now`
    ///
    /// A global denial rolls back the caller's hit so the caller is not
    /// charged for a request that never ran.
    pub fn check_at(&self, caller: &str, now: Instant) -> RateLimitDecision {
        let caller_decision = self.per_caller.check_at(caller, now);
        if !caller_decision.allowed {
            tracing::debug!(caller = %caller, "Per-caller rate limit exceeded");
            return caller_decision;
        }

        let global_decision = self.global.check_at(GLOBAL_KEY, now);
        if !global_decision.allowed {
            self.per_caller.rollback_at(caller, now);
            tracing::warn!(caller = %caller, "Global rate limit exceeded");
            return global_decision;
        }

        caller_decision
    }

    /// Per-caller counters
    #[must_use]
    pub fn per_caller(&self) -> &RateLimiter {
        &self.per_caller
    }

    /// Global counter
    #[must_use]
    pub fn global(&self) -> &RateLimiter {
        &self.global
    }

    /// Purge expired entries from both tables
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.per_caller.sweep_at(now) + self.global.sweep_at(now)
    }

    /// Start the periodic sweep task
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let limiter = Arc::clone(self);
        let period = self.sweep_interval.max(Duration::from_millis(10));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = limiter.sweep_at(Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired rate limit entries");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Rate limit sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle to stop a running sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).await.is_err() {
            tracing::debug!("Rate limit sweeper already stopped");
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Rate limit sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3, WINDOW, 100);
        let now = Instant::now();

        let remaining: Vec<u32> = (0..3).map(|_| limiter.check_at("a", now).remaining).collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("a", now + Duration::from_secs(1));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, Duration::from_secs(59));
    }

    #[test]
    fn test_window_resets_lazily() {
        let limiter = RateLimiter::new(1, WINDOW, 100);
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now + Duration::from_secs(59)).allowed);
        assert!(limiter.check_at("a", now + WINDOW).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, WINDOW, 100);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let limiter = RateLimiter::new(5, WINDOW, 2);
        let now = Instant::now();

        limiter.check_at("old", now);
        limiter.check_at("recent", now + Duration::from_secs(1));
        limiter.check_at("old", now + Duration::from_secs(2));
        limiter.check_at("new", now + Duration::from_secs(3));

        assert_eq!(limiter.len(), 2);
        assert_eq!(limiter.count_at("recent", now + Duration::from_secs(3)), 0);
        assert_eq!(limiter.count_at("old", now + Duration::from_secs(3)), 2);
        assert_eq!(limiter.count_at("new", now + Duration::from_secs(3)), 1);
    }

    #[test]
    fn test_expired_entries_swept_before_lru_eviction() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10), 4);
        let now = Instant::now();

        for key in ["a", "b", "c"] {
            limiter.check_at(key, now);
        }
        limiter.check_at("live", now + Duration::from_secs(9));
        limiter.check_at("fresh", now + Duration::from_secs(11));

        assert_eq!(limiter.len(), 2);
        assert_eq!(limiter.count_at("live", now + Duration::from_secs(11)), 1);
        assert_eq!(limiter.count_at("fresh", now + Duration::from_secs(11)), 1);
    }

    #[test]
    fn test_rollback_never_underflows() {
        let limiter = RateLimiter::new(2, WINDOW, 10);
        let now = Instant::now();

        limiter.rollback_at("missing", now);
        limiter.check_at("a", now);
        limiter.rollback_at("a", now);
        limiter.rollback_at("a", now);
        assert_eq!(limiter.count_at("a", now), 0);
    }

    #[test]
    fn test_rollback_ignored_after_window_expiry() {
        let limiter = RateLimiter::new(2, WINDOW, 10);
        let now = Instant::now();
        limiter.check_at("a", now);
        limiter.rollback_at("a", now + WINDOW);
        assert_eq!(limiter.count_at("a", now + Duration::from_secs(1)), 1);
    }

    #[test]
    fn test_disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(1, WINDOW, 10).with_enabled(false);
        for _ in 0..10 {
            let decision = limiter.check("a");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let limiter = RateLimiter::new(5, WINDOW, 10);
        let now = Instant::now();
        limiter.check_at("a", now);
        limiter.check_at("b", now + Duration::from_secs(30));

        assert_eq!(limiter.sweep_at(now + WINDOW), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_composite_global_denial_rolls_back_caller() {
        let limiter = CompositeRateLimiter::new(
            RateLimitConfig::new()
                .with_per_caller_limit(5)
                .with_global_limit(1),
        );
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        let denied = limiter.check_at("b", now);
        assert!(!denied.allowed);
        assert_eq!(denied.scope, LimitScope::Global);
        assert_eq!(denied.limit, 1);
        assert_eq!(limiter.per_caller().count_at("b", now), 0);
        assert_eq!(limiter.per_caller().count_at("a", now), 1);
    }

    #[test]
    fn test_composite_caller_denial_skips_global() {
        let limiter = CompositeRateLimiter::new(
            RateLimitConfig::new()
                .with_per_caller_limit(1)
                .with_global_limit(10),
        );
        let now = Instant::now();

        limiter.check_at("a", now);
        let denied = limiter.check_at("a", now);
        assert_eq!(denied.scope, LimitScope::Caller);
        assert_eq!(limiter.global().count_at(GLOBAL_KEY, now), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_in: Duration::from_millis(1500),
            scope: LimitScope::Caller,
        };
        assert_eq!(decision.retry_after_secs(), 2);
        assert!(decision.reset_at_unix() >= chrono::Utc::now().timestamp() + 1);

        let immediate = RateLimitDecision {
            reset_in: Duration::ZERO,
            ..decision
        };
        assert_eq!(immediate.retry_after_secs(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_shuts_down() {
        let limiter = Arc::new(CompositeRateLimiter::new(
            RateLimitConfig::new()
                .with_window(Duration::from_millis(5))
                .with_sweep_interval(Duration::from_millis(10)),
        ));
        limiter.check("a");

        let handle = limiter.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.per_caller().is_empty());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
