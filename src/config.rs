//! Configuration management for the admission layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AdmissionError, Result};
use crate::ratelimit::{ActionRules, LimitRule};
use crate::sanitize::{SanitizationPolicy, DEFAULT_ALLOWED_PROTOCOLS, DEFAULT_MAX_LENGTH, HARD_DENIED_PROTOCOLS};
use crate::validation::SubmissionConfig;

/// Prefix for environment overrides, e.g. `ADMISSION__RATE_LIMITING__SWEEP_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "ADMISSION";

/// Main configuration for the admission layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Submission validation configuration
    #[serde(default)]
    pub submission: SubmissionConfig,

    /// Sanitization configuration
    #[serde(default)]
    pub sanitization: SanitizationConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Dedicated rules per action class
    #[serde(default = "default_actions")]
    pub actions: HashMap<String, LimitRule>,

    /// Rule for action classes without a dedicated entry
    #[serde(default = "default_general")]
    pub general: LimitRule,

    /// Cap on identities tracked per limiter, 0 for unbounded
    #[serde(default = "default_max_tracked_identities")]
    pub max_tracked_identities: usize,

    /// Interval between sweeps of idle records, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            actions: default_actions(),
            general: default_general(),
            max_tracked_identities: default_max_tracked_identities(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    /// The per-action rules.
    pub fn rules(&self) -> ActionRules {
        ActionRules {
            actions: self.actions.clone(),
            general: self.general.clone(),
        }
    }
}

fn default_actions() -> HashMap<String, LimitRule> {
    ActionRules::default().actions
}

fn default_general() -> LimitRule {
    ActionRules::default().general
}

fn default_max_tracked_identities() -> usize {
    100_000
}

fn default_sweep_interval() -> u64 {
    60
}

/// Sanitization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizationConfig {
    /// URL schemes accepted for links
    #[serde(default = "default_allowed_protocols")]
    pub allowed_protocols: Vec<String>,

    /// Maximum length of sanitized plain text
    #[serde(default = "default_text_max_length")]
    pub text_max_length: usize,

    /// Policy for constrained markup
    #[serde(default)]
    pub rich_text: SanitizationPolicy,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            allowed_protocols: default_allowed_protocols(),
            text_max_length: default_text_max_length(),
            rich_text: SanitizationPolicy::default(),
        }
    }
}

fn default_allowed_protocols() -> Vec<String> {
    DEFAULT_ALLOWED_PROTOCOLS.iter().map(|p| p.to_string()).collect()
}

fn default_text_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

impl AdmissionConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading admission configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AdmissionConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: an optional file, then `ADMISSION__*`
    /// environment variables on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading admission configuration");
            builder = builder.add_source(::config::File::with_name(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AdmissionConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that indicate a programming error.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.rules().validate()?;

        if self.sanitization.text_max_length == 0 {
            return Err(AdmissionError::Config(
                "sanitization.text_max_length must be positive".to_string(),
            ));
        }

        for (field, rule) in [
            ("submission.text", &self.submission.text),
            ("submission.identifier", &self.submission.identifier),
        ] {
            if rule.min_length > rule.max_length {
                return Err(AdmissionError::Config(format!(
                    "{}: min_length {} exceeds max_length {}",
                    field, rule.min_length, rule.max_length
                )));
            }
            // Text is truncated to this length before length checks run, so a
            // shorter cut would silently accept over-long submissions.
            if self.sanitization.text_max_length < rule.max_length {
                return Err(AdmissionError::Config(format!(
                    "sanitization.text_max_length {} is below {}.max_length {}",
                    self.sanitization.text_max_length, field, rule.max_length
                )));
            }
        }

        for protocol in &self.sanitization.allowed_protocols {
            let scheme = protocol.trim().trim_end_matches(':').to_ascii_lowercase();
            if HARD_DENIED_PROTOCOLS.contains(&scheme.as_str()) {
                warn!(protocol = %protocol, "Allow-listed protocol is always denied and will be ignored");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{QUESTIONS, VOTES};
    use crate::validation::LengthRule;

    #[test]
    fn test_defaults() {
        let config = AdmissionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limiting.actions[QUESTIONS], LimitRule::new(5, 60_000));
        assert_eq!(config.rate_limiting.general, LimitRule::new(100, 60_000));
        assert_eq!(config.rate_limiting.max_tracked_identities, 100_000);
        assert_eq!(config.submission.text, LengthRule::new(10, 500));
        assert_eq!(config.submission.identifier, LengthRule::new(3, 50));
        assert_eq!(config.sanitization.allowed_protocols, vec!["http", "https", "mailto"]);
        assert_eq!(config.sanitization.text_max_length, 1000);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  actions:
    questions:
      max_requests: 1
      window_ms: 60000
  sweep_interval_secs: 5
submission:
  text:
    min_length: 5
    max_length: 280
"#;
        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.actions.len(), 1);
        assert_eq!(config.rate_limiting.rules().rule_for(VOTES), &LimitRule::new(100, 60_000));
        assert_eq!(config.rate_limiting.sweep_interval_secs, 5);
        assert_eq!(config.submission.text, LengthRule::new(5, 280));
        assert_eq!(config.submission.identifier, LengthRule::new(3, 50));
        assert_eq!(config.sanitization, SanitizationConfig::default());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(AdmissionConfig::from_yaml("{}").unwrap(), AdmissionConfig::default());
    }

    #[test]
    fn test_rejects_zero_window() {
        let yaml = r#"
rate_limiting:
  general:
    max_requests: 10
    window_ms: 0
"#;
        assert!(AdmissionConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_inverted_lengths() {
        let mut config = AdmissionConfig::default();
        config.submission.identifier = LengthRule::new(10, 5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("submission.identifier"));
    }

    #[test]
    fn test_rejects_truncation_below_submission_limit() {
        let yaml = r#"
sanitization:
  text_max_length: 200
"#;
        let err = AdmissionConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("submission.text.max_length 500"));

        let yaml = r#"
sanitization:
  text_max_length: 200
submission:
  text:
    min_length: 10
    max_length: 200
"#;
        assert!(AdmissionConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("admission-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  max_tracked_identities: 10\nsanitization:\n  text_max_length: 800\n",
        )
        .unwrap();

        let config = AdmissionConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limiting.max_tracked_identities, 10);
        assert_eq!(config.sanitization.text_max_length, 800);
    }

    #[test]
    fn test_missing_file() {
        let err = AdmissionConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, AdmissionError::Io(_)));
    }

    #[test]
    fn test_layered_load_from_file() {
        let path = std::env::temp_dir().join(format!("admission-layered-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  actions:\n    votes:\n      max_requests: 3\n      window_ms: 1000\n",
        )
        .unwrap();

        let config = AdmissionConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rate_limiting.actions[VOTES], LimitRule::new(3, 1000));
        assert_eq!(config.submission, SubmissionConfig::default());
    }
}
