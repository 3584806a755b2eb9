//! Per-action-class rate limit rules.
//!
//! Each action class (question posts, votes, bookmark toggles) carries its own
//! quota. Anything without a dedicated rule is charged against the general
//! rule.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{AdmissionError, Result};

/// Action class for question submissions.
pub const QUESTIONS: &str = "questions";
/// Action class for votes on questions.
pub const VOTES: &str = "votes";
/// Action class for bookmark toggles.
pub const BOOKMARKS: &str = "bookmarks";
/// Name used for the fallback limiter.
pub const GENERAL: &str = "general";

/// A rate limit rule: at most `max_requests` accepted attempts in any
/// trailing `window_ms` interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Attempts allowed per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitRule {
    /// Create a rule.
    pub fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject rules that could never admit anything.
    pub fn validate(&self, action: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(AdmissionError::Config(format!(
                "max_requests for '{}' must be positive",
                action
            )));
        }
        if self.window_ms == 0 {
            return Err(AdmissionError::Config(format!(
                "window_ms for '{}' must be positive",
                action
            )));
        }
        Ok(())
    }
}

/// Rules keyed by action class, plus the general fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRules {
    /// Dedicated rules per action class
    #[serde(default = "default_actions")]
    pub actions: HashMap<String, LimitRule>,
    /// Rule for action classes without a dedicated entry
    #[serde(default = "default_general")]
    pub general: LimitRule,
}

impl Default for ActionRules {
    fn default() -> Self {
        Self {
            actions: default_actions(),
            general: default_general(),
        }
    }
}

pub(crate) fn default_actions() -> HashMap<String, LimitRule> {
    HashMap::from([
        (QUESTIONS.to_string(), LimitRule::new(5, 60_000)),
        (VOTES.to_string(), LimitRule::new(10, 60_000)),
        (BOOKMARKS.to_string(), LimitRule::new(20, 60_000)),
    ])
}

pub(crate) fn default_general() -> LimitRule {
    LimitRule::new(100, 60_000)
}

impl ActionRules {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: ActionRules = serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Rule for an action class, falling back to the general rule.
    pub fn rule_for(&self, action: &str) -> &LimitRule {
        self.actions.get(action).unwrap_or(&self.general)
    }

    /// Check every rule.
    pub fn validate(&self) -> Result<()> {
        for (action, rule) in &self.actions {
            rule.validate(action)?;
        }
        self.general.validate(GENERAL)
    }
}
