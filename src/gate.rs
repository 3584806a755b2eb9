//! Admission gate: rate limit, then validate, then hand back clean data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::{AdmissionConfig, SanitizationConfig};
use crate::error::Result;
use crate::ratelimit::{Clock, LimiterRegistry, SystemClock};
use crate::sanitize::{sanitize_rich_text, sanitize_url};
use crate::validation::SubmissionValidator;

/// Error reported when the identity is over quota.
pub const RATE_LIMITED_MESSAGE: &str = "rate limit exceeded";

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// Accepted
    Ok,
    /// The identity exhausted its quota for the action class
    RateLimited,
    /// The payload failed validation
    ValidationFailed,
}

/// Outcome of one admission check. Rejections are data, never errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionDecision {
    pub accepted: bool,
    pub reason: DecisionReason,
    /// Cleaned payload to persist, present only when accepted
    pub sanitized_payload: Option<Map<String, Value>>,
    pub errors: Vec<String>,
    /// Milliseconds until the identity may try again, when rate limited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl AdmissionDecision {
    fn accepted(sanitized: Map<String, Value>) -> Self {
        Self {
            accepted: true,
            reason: DecisionReason::Ok,
            sanitized_payload: Some(sanitized),
            errors: Vec::new(),
            retry_after_ms: None,
        }
    }

    fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        Self {
            accepted: false,
            reason: DecisionReason::RateLimited,
            sanitized_payload: None,
            errors: vec![RATE_LIMITED_MESSAGE.to_string()],
            retry_after_ms,
        }
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self {
            accepted: false,
            reason: DecisionReason::ValidationFailed,
            sanitized_payload: None,
            errors,
            retry_after_ms: None,
        }
    }
}

/// Composes the limiter registry and the submission validator.
///
/// Create one at startup and share it (e.g. behind an `Arc`) with request
/// handlers. Every check is synchronous and does no I/O.
#[derive(Debug)]
pub struct AdmissionGate {
    limiters: LimiterRegistry,
    validator: SubmissionValidator,
    sanitization: SanitizationConfig,
}

impl AdmissionGate {
    /// Create a gate from its parts with default sanitization settings.
    pub fn new(limiters: LimiterRegistry, validator: SubmissionValidator) -> Self {
        Self {
            limiters,
            validator,
            sanitization: SanitizationConfig::default(),
        }
    }

    /// Replace the sanitization settings used for markup and links.
    pub fn with_sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }

    /// Build a gate from configuration using the system clock.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Build a gate from configuration with an explicit clock.
    pub fn from_config_with_clock(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let limiters = LimiterRegistry::with_clock(
            &config.rate_limiting.rules(),
            config.rate_limiting.max_tracked_identities,
            clock,
        )?;
        let validator =
            SubmissionValidator::from_config(&config.submission, config.sanitization.text_max_length)?;

        info!(validator = ?validator, "Admission gate initialized");
        Ok(Self::new(limiters, validator).with_sanitization(config.sanitization.clone()))
    }

    /// Decide whether `identity` may perform `action` with `payload`.
    ///
    /// The rate limit is always consulted first; an identity over quota is
    /// rejected without looking at the payload. An attempt that passes the
    /// limiter consumes quota even if its payload is then rejected, so
    /// repeated invalid submissions exhaust the identity's allowance.
    #[instrument(skip_all, fields(action = %action, identity = %identity))]
    pub fn check(&self, action: &str, identity: &str, payload: &Value) -> AdmissionDecision {
        let limiter = self.limiters.limiter_for(action);

        if !limiter.is_allowed(identity) {
            let retry_after_ms = limiter
                .retry_after(identity)
                .map(|d| d.as_millis() as u64);
            debug!(retry_after_ms = ?retry_after_ms, "Admission rejected: rate limited");
            return AdmissionDecision::rate_limited(retry_after_ms);
        }

        let result = self.validator.validate(payload);
        if !result.is_valid {
            debug!(errors = ?result.errors, "Admission rejected: validation failed");
            return AdmissionDecision::invalid(result.errors);
        }

        debug!("Admission accepted");
        AdmissionDecision::accepted(result.sanitized)
    }

    /// Clean constrained markup with the configured policy.
    pub fn clean_rich_text(&self, input: &str) -> String {
        sanitize_rich_text(input, &self.sanitization.rich_text)
    }

    /// Vet a link against the configured protocols.
    pub fn clean_url(&self, input: &str) -> Option<String> {
        sanitize_url(input, &self.sanitization.allowed_protocols)
    }

    /// Attempts `identity` has left for `action` in the current window.
    pub fn remaining(&self, action: &str, identity: &str) -> u64 {
        self.limiters.limiter_for(action).remaining(identity)
    }

    /// Drop idle rate-limit records, returning how many were removed.
    pub fn sweep(&self) -> usize {
        self.limiters.sweep()
    }

    /// The limiter registry.
    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }
}
