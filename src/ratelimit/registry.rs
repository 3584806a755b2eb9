//! Named rate limiters, one per action class.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::limiter::RateLimiter;
use super::rules::{ActionRules, LimitRule, GENERAL};
use crate::error::Result;

/// A set of independent rate limiters keyed by action class.
///
/// Built once at startup and shared with request handlers. Consumption
/// against one action class never affects another.
#[derive(Debug)]
pub struct LimiterRegistry {
    limiters: HashMap<String, RateLimiter>,
    general: RateLimiter,
}

impl LimiterRegistry {
    /// Build a registry from rules using the system clock.
    pub fn new(rules: &ActionRules) -> Result<Self> {
        Self::with_clock(rules, 0, Arc::new(SystemClock::new()))
    }

    /// Build a registry from rules with an identity cap and explicit clock.
    ///
    /// All limiters share the clock. `max_tracked` of zero leaves them unbounded.
    pub fn with_clock(rules: &ActionRules, max_tracked: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let build = |action: &str, rule: &LimitRule| -> Result<RateLimiter> {
            rule.validate(action)?;
            let limiter = RateLimiter::from_rule(rule)?
                .with_clock(clock.clone())
                .with_max_tracked(max_tracked);
            debug!(
                action = %action,
                limit = limiter.max_requests(),
                window = ?limiter.window(),
                "Registered rate limiter"
            );
            Ok(limiter)
        };

        let mut limiters = HashMap::with_capacity(rules.actions.len());
        for (action, rule) in &rules.actions {
            limiters.insert(action.clone(), build(action, rule)?);
        }
        let general = build(GENERAL, &rules.general)?;

        info!(action_classes = limiters.len(), "Rate limiter registry initialized");
        Ok(Self { limiters, general })
    }

    /// The limiter for an action class, or the general limiter if none is registered.
    pub fn limiter_for(&self, action: &str) -> &RateLimiter {
        self.limiters.get(action).unwrap_or(&self.general)
    }

    /// The general-purpose fallback limiter.
    pub fn general(&self) -> &RateLimiter {
        &self.general
    }

    /// Whether a dedicated limiter exists for `action`.
    pub fn contains(&self, action: &str) -> bool {
        self.limiters.contains_key(action)
    }

    /// Sweep every limiter, returning the total number of identities removed.
    pub fn sweep(&self) -> usize {
        self.limiters
            .values()
            .chain(std::iter::once(&self.general))
            .map(RateLimiter::sweep)
            .sum()
    }

    /// Total tracked identities across all limiters.
    pub fn tracked_identities(&self) -> usize {
        self.limiters
            .values()
            .chain(std::iter::once(&self.general))
            .map(RateLimiter::tracked_identities)
            .sum()
    }
}
