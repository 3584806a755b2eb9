//! Core sliding-window rate limiter.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::rules::LimitRule;
use super::window::SlidingWindow;
use crate::error::{AdmissionError, Result};

/// A tracked identity: its window plus its position in the recency index.
#[derive(Debug, Default)]
struct Record {
    window: SlidingWindow,
    /// Access stamp in [`RecencyIndex`], `None` while the limiter is uncapped
    stamp: Option<u64>,
}

/// Access order of tracked identities, least recently seen first.
///
/// Only maintained for capped limiters. Lock order is always record shard,
/// then index; the index lock is never held while taking a shard lock.
#[derive(Debug, Default)]
struct RecencyIndex {
    next: u64,
    order: BTreeMap<u64, String>,
}

impl RecencyIndex {
    /// Move `identity` to the most recent position and return its new stamp.
    fn touch(&mut self, previous: Option<u64>, identity: &str) -> u64 {
        let stamp = self.next;
        self.next += 1;

        let key = previous
            .and_then(|p| self.order.remove(&p))
            .unwrap_or_else(|| identity.to_string());
        self.order.insert(stamp, key);
        stamp
    }

    fn forget(&mut self, stamp: u64) {
        self.order.remove(&stamp);
    }
}

/// A per-identity sliding-window rate limiter.
///
/// Each identity owns an independent [`SlidingWindow`]. Records live in a
/// sharded map: a check for one identity holds only that identity's shard
/// lock, so the prune, compare and record steps for an identity happen
/// atomically while unrelated identities proceed in parallel.
///
/// This struct is thread-safe and can be shared across threads behind an `Arc`.
pub struct RateLimiter {
    /// Records indexed by identity key
    records: DashMap<String, Record>,
    /// Least-recently-seen order, used only when `max_tracked` is set
    recency: Mutex<RecencyIndex>,
    /// Maximum accepted attempts per window
    max_requests: u64,
    /// Window length in milliseconds
    window_ms: u64,
    /// Soft cap on tracked identities, 0 for unbounded
    max_tracked: usize,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter allowing `max_requests` attempts per `window_ms`.
    ///
    /// Fails if either value is zero.
    pub fn new(max_requests: u64, window_ms: u64) -> Result<Self> {
        if max_requests == 0 {
            return Err(AdmissionError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(AdmissionError::Config("window_ms must be positive".to_string()));
        }

        Ok(Self {
            records: DashMap::new(),
            recency: Mutex::new(RecencyIndex::default()),
            max_requests,
            window_ms,
            max_tracked: 0,
            clock: Arc::new(SystemClock::new()),
        })
    }

    /// Create a rate limiter from a configured rule.
    pub fn from_rule(rule: &LimitRule) -> Result<Self> {
        Self::new(rule.max_requests, rule.window_ms)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cap the number of tracked identities.
    ///
    /// When a new identity arrives at capacity, the least recently seen
    /// identity is evicted. Expired records are left to [`RateLimiter::sweep`].
    /// The cap is soft: concurrent first attempts may briefly overshoot it.
    ///
    /// Call this before the limiter sees any traffic.
    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked;
        self
    }

    /// Check whether `identity` may perform another attempt, recording it if so.
    ///
    /// A rejected attempt is not recorded.
    pub fn is_allowed(&self, identity: &str) -> bool {
        let now = self.clock.now_ms();

        trace!(identity = %identity, now = now, "Checking rate limit");

        let allowed = match self.records.get_mut(identity) {
            Some(mut record) => {
                self.touch(&mut record, identity);
                record.window.try_record(now, self.window_ms, self.max_requests)
            }
            None => {
                if self.max_tracked > 0 {
                    self.make_room();
                }
                let mut record = self
                    .records
                    .entry(identity.to_string())
                    .or_insert_with(|| {
                        debug!(identity = %identity, "Creating new sliding window");
                        Record::default()
                    });
                self.touch(&mut record, identity);
                record.window.try_record(now, self.window_ms, self.max_requests)
            }
        };

        if !allowed {
            debug!(
                identity = %identity,
                limit = self.max_requests,
                window_ms = self.window_ms,
                "Rate limit exceeded"
            );
        }

        allowed
    }

    /// Attempts `identity` has left in the current window. Does not record anything.
    pub fn remaining(&self, identity: &str) -> u64 {
        let now = self.clock.now_ms();
        match self.records.get(identity) {
            Some(record) => self
                .max_requests
                .saturating_sub(record.window.live_count(now, self.window_ms)),
            None => self.max_requests,
        }
    }

    /// How long until `identity` may attempt again, or `None` if it may now.
    pub fn retry_after(&self, identity: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        self.records.get(identity).and_then(|record| {
            record
                .window
                .retry_after(now, self.window_ms, self.max_requests)
        })
    }

    /// Prune every record and drop the ones left empty.
    ///
    /// Returns the number of identities removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        let mut stamps = Vec::new();

        self.records.retain(|_, record| {
            record.window.prune(now, self.window_ms);
            let keep = !record.window.is_empty();
            if !keep {
                removed += 1;
                stamps.extend(record.stamp);
            }
            keep
        });

        if !stamps.is_empty() {
            let mut recency = self.recency.lock();
            for stamp in stamps {
                recency.forget(stamp);
            }
        }

        if removed > 0 {
            debug!(removed = removed, remaining = self.records.len(), "Swept idle windows");
        }
        removed
    }

    /// Record an access to `identity` in the recency index.
    fn touch(&self, record: &mut Record, identity: &str) {
        if self.max_tracked == 0 {
            return;
        }
        let stamp = self.recency.lock().touch(record.stamp, identity);
        record.stamp = Some(stamp);
    }

    /// Evict least recently seen identities until a new one fits under the cap.
    fn make_room(&self) {
        loop {
            let victim = {
                let mut recency = self.recency.lock();
                if recency.order.len() < self.max_tracked {
                    return;
                }
                recency.order.pop_first()
            };

            let Some((stamp, key)) = victim else {
                return;
            };

            // A record touched since it was popped has a fresh stamp and stays.
            if self
                .records
                .remove_if(&key, |_, record| record.stamp == Some(stamp))
                .is_some()
            {
                debug!(identity = %key, "Evicted least recently seen window");
            }
        }
    }

    /// Forget everything recorded for `identity`.
    pub fn reset(&self, identity: &str) {
        if let Some((_, record)) = self.records.remove(identity) {
            if let Some(stamp) = record.stamp {
                self.recency.lock().forget(stamp);
            }
        }
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
        self.recency.lock().order.clear();
    }

    /// Get the number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }

    /// Get the limit for this limiter.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the window length for this limiter.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window_ms", &self.window_ms)
            .field("max_tracked", &self.max_tracked)
            .field("tracked", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter_with_clock(max_requests: u64, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(max_requests, window_ms)
            .unwrap()
            .with_clock(clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_rejects_zero_configuration() {
        assert!(RateLimiter::new(0, 1000).is_err());
        assert!(RateLimiter::new(3, 0).is_err());
        assert!(RateLimiter::from_rule(&LimitRule::new(3, 1000)).is_ok());
    }

    #[test]
    fn test_sliding_window_correctness() {
        let (limiter, clock) = limiter_with_clock(3, 1000);

        assert!(limiter.is_allowed("id"));
        assert!(limiter.is_allowed("id"));
        assert!(limiter.is_allowed("id"));
        assert!(!limiter.is_allowed("id"));

        clock.set(1001);
        assert!(limiter.is_allowed("id"));
    }

    #[test]
    fn test_slots_free_individually() {
        let (limiter, clock) = limiter_with_clock(3, 1000);

        assert!(limiter.is_allowed("id"));
        clock.set(300);
        assert!(limiter.is_allowed("id"));
        clock.set(600);
        assert!(limiter.is_allowed("id"));
        assert!(!limiter.is_allowed("id"));

        // Only the t=0 slot has expired
        clock.set(1000);
        assert_eq!(limiter.remaining("id"), 1);
        assert!(limiter.is_allowed("id"));
        assert!(!limiter.is_allowed("id"));

        clock.set(1300);
        assert!(limiter.is_allowed("id"));
    }

    #[test]
    fn test_per_identity_isolation() {
        let (limiter, _clock) = limiter_with_clock(2, 1000);

        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));

        assert!(limiter.is_allowed("b"));
        assert_eq!(limiter.remaining("b"), 1);
    }

    #[test]
    fn test_remaining_is_read_only() {
        let (limiter, _clock) = limiter_with_clock(3, 1000);

        assert_eq!(limiter.remaining("id"), 3);
        assert_eq!(limiter.tracked_identities(), 0);

        limiter.is_allowed("id");
        assert_eq!(limiter.remaining("id"), 2);
        assert_eq!(limiter.remaining("id"), 2);
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let (limiter, clock) = limiter_with_clock(1, 1000);

        assert!(limiter.is_allowed("id"));
        clock.set(500);
        assert!(!limiter.is_allowed("id"));

        // Had the rejection been recorded, the window would stay full until 1500
        clock.set(1000);
        assert!(limiter.is_allowed("id"));
    }

    #[test]
    fn test_retry_after() {
        let (limiter, clock) = limiter_with_clock(1, 1000);

        assert_eq!(limiter.retry_after("id"), None);
        limiter.is_allowed("id");

        clock.set(250);
        assert_eq!(limiter.retry_after("id"), Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_sweep_removes_expired_windows() {
        let (limiter, clock) = limiter_with_clock(2, 1000);

        limiter.is_allowed("a");
        limiter.is_allowed("b");
        clock.set(500);
        limiter.is_allowed("c");

        clock.set(1200);
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_identities(), 1);
        assert_eq!(limiter.remaining("c"), 1);
    }

    #[test]
    fn test_bounded_memory_under_sustained_load() {
        let (limiter, clock) = limiter_with_clock(5, 1000);
        let identities: Vec<String> = (0..10).map(|i| format!("user-{}", i)).collect();

        for round in 0..1000u64 {
            clock.set(round * 37);
            for identity in &identities {
                limiter.is_allowed(identity);
            }
        }

        assert_eq!(limiter.tracked_identities(), identities.len());
        for identity in &identities {
            let record = limiter.records.get(identity.as_str()).unwrap();
            assert!(record.window.len() as u64 <= limiter.max_requests());
        }
    }

    #[test]
    fn test_capacity_evicts_least_recently_seen() {
        let (limiter, clock) = limiter_with_clock(5, 60_000);
        let limiter = limiter.with_max_tracked(3);

        limiter.is_allowed("a");
        clock.set(10);
        limiter.is_allowed("b");
        clock.set(20);
        limiter.is_allowed("c");
        clock.set(30);
        limiter.is_allowed("a");

        clock.set(40);
        limiter.is_allowed("d");

        assert_eq!(limiter.tracked_identities(), 3);
        assert_eq!(limiter.remaining("b"), 5);
        assert_eq!(limiter.remaining("a"), 3);
    }

    #[test]
    fn test_capacity_evicts_idle_before_active() {
        let (limiter, clock) = limiter_with_clock(5, 100);
        let limiter = limiter.with_max_tracked(2);

        limiter.is_allowed("a");
        clock.set(50);
        limiter.is_allowed("b");

        // "a" has expired, "b" has not
        clock.set(120);
        limiter.is_allowed("c");

        assert_eq!(limiter.tracked_identities(), 2);
        assert_eq!(limiter.remaining("b"), 4);
    }

    #[test]
    fn test_capacity_evicts_one_record_per_new_identity() {
        let (limiter, clock) = limiter_with_clock(5, 1000);
        let limiter = limiter.with_max_tracked(1000);

        for i in 0..1000 {
            limiter.is_allowed(&format!("old-{}", i));
        }

        // Every record is expired, but admission only makes room for itself
        // and leaves the rest to the periodic sweep.
        clock.set(5000);
        for i in 0..200 {
            assert!(limiter.is_allowed(&format!("new-{}", i)));
            assert_eq!(limiter.tracked_identities(), 1000);
        }

        // Evictions followed access order exactly
        for i in 0..200 {
            assert!(!limiter.records.contains_key(format!("old-{}", i).as_str()));
        }
        for i in 200..1000 {
            assert!(limiter.records.contains_key(format!("old-{}", i).as_str()));
        }
        assert_eq!(limiter.recency.lock().order.len(), 1000);

        assert_eq!(limiter.sweep(), 800);
        assert_eq!(limiter.tracked_identities(), 200);
        assert_eq!(limiter.recency.lock().order.len(), 200);
    }

    #[test]
    fn test_recency_index_follows_reset_and_clear() {
        let (limiter, _clock) = limiter_with_clock(5, 1000);
        let limiter = limiter.with_max_tracked(2);

        limiter.is_allowed("a");
        limiter.is_allowed("b");
        limiter.reset("a");
        assert_eq!(limiter.recency.lock().order.len(), 1);

        // Room left by the reset means nothing is evicted
        limiter.is_allowed("c");
        assert_eq!(limiter.remaining("b"), 4);
        assert_eq!(limiter.tracked_identities(), 2);

        limiter.clear();
        assert!(limiter.recency.lock().order.is_empty());
    }

    #[test]
    fn test_uncapped_limiter_skips_recency_index() {
        let (limiter, _clock) = limiter_with_clock(5, 1000);

        limiter.is_allowed("a");
        limiter.is_allowed("b");

        assert!(limiter.recency.lock().order.is_empty());
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[test]
    fn test_concurrent_attempts_never_over_admit() {
        let (limiter, _clock) = limiter_with_clock(10, 60_000);
        let limiter = Arc::new(limiter);

        let admitted: u64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    scope.spawn(move || {
                        (0..50).filter(|_| limiter.is_allowed("shared")).count() as u64
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 10);
        assert_eq!(limiter.remaining("shared"), 0);
    }

    #[test]
    fn test_reset_and_clear() {
        let (limiter, _clock) = limiter_with_clock(1, 1000);

        limiter.is_allowed("a");
        limiter.is_allowed("b");
        limiter.reset("a");
        assert!(limiter.is_allowed("a"));

        limiter.clear();
        assert_eq!(limiter.tracked_identities(), 0);
    }
}
