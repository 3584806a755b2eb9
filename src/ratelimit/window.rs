//! Sliding window of accepted attempts for a single identity.

use std::collections::VecDeque;
use std::time::Duration;

/// Timestamps (in clock milliseconds) of accepted attempts, oldest first.
///
/// Every stored timestamp is younger than the window as of the last prune,
/// and timestamps are non-decreasing in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    timestamps: VecDeque<u64>,
}

impl SlidingWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp that has aged out of the window.
    pub fn prune(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_sub(oldest) < window_ms {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    /// Prune, then record `now` if there is room.
    ///
    /// Returns `true` if the attempt was recorded, `false` if the window is full.
    /// A rejected attempt is not recorded.
    pub fn try_record(&mut self, now: u64, window_ms: u64, max_requests: u64) -> bool {
        self.prune(now, window_ms);

        if self.timestamps.len() as u64 >= max_requests {
            return false;
        }

        // Clamp so the insertion order invariant survives a lagging clock.
        let stamp = self.timestamps.back().map_or(now, |&last| last.max(now));
        self.timestamps.push_back(stamp);
        true
    }

    /// Number of timestamps that would survive a prune at `now`.
    pub fn live_count(&self, now: u64, window_ms: u64) -> u64 {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_sub(t) < window_ms)
            .count() as u64
    }

    /// Time until one more attempt would be admitted, if the window is full.
    pub fn retry_after(&self, now: u64, window_ms: u64, max_requests: u64) -> Option<Duration> {
        let live: Vec<u64> = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| now.saturating_sub(t) < window_ms)
            .collect();

        if (live.len() as u64) < max_requests {
            return None;
        }

        // The slot that frees up first belongs to the timestamp whose expiry
        // brings the live count back below the limit.
        let index = live.len() - max_requests as usize;
        let frees_at = live[index] + window_ms;
        Some(Duration::from_millis(frees_at.saturating_sub(now)))
    }

    /// Number of stored timestamps, without pruning.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the window holds no timestamps, without pruning.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
