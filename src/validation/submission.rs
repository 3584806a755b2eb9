//! Question submission validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::trace;

use super::rules::{default_rules, PatternRule, SpamRule};
use crate::error::Result;
use crate::sanitize::{sanitize_text, sanitize_text_value, DEFAULT_MAX_LENGTH};

/// Payload field holding the question text.
pub const TEXT_FIELD: &str = "text";
/// Optional payload field referencing a programme session.
pub const IDENTIFIER_FIELD: &str = "session_id";
/// Payload flag asking for the question to be posted anonymously.
pub const ANONYMOUS_FIELD: &str = "anonymous";

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("valid identifier pattern"));

/// Inclusive length bounds, in characters, for a sanitized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthRule {
    pub min_length: usize,
    pub max_length: usize,
}

impl LengthRule {
    pub fn new(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
        }
    }

    fn check(&self, field: &str, value: &str, errors: &mut Vec<String>) {
        let length = value.chars().count();
        if length < self.min_length {
            errors.push(format!("{} must be at least {} characters", field, self.min_length));
        }
        if length > self.max_length {
            errors.push(format!("{} must be at most {} characters", field, self.max_length));
        }
    }
}

/// Submission validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Bounds for the question text
    #[serde(default = "default_text_rule")]
    pub text: LengthRule,

    /// Bounds for the optional session identifier
    #[serde(default = "default_identifier_rule")]
    pub identifier: LengthRule,

    /// Extra spam patterns, by name, appended after the built-in heuristics
    #[serde(default)]
    pub blocked_patterns: Vec<NamedPattern>,
}

/// A configured spam pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            text: default_text_rule(),
            identifier: default_identifier_rule(),
            blocked_patterns: Vec::new(),
        }
    }
}

fn default_text_rule() -> LengthRule {
    LengthRule::new(10, 500)
}

fn default_identifier_rule() -> LengthRule {
    LengthRule::new(3, 50)
}

/// Outcome of validating one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    /// Whether every field passed
    pub is_valid: bool,
    /// Every violation found, in field order
    pub errors: Vec<String>,
    /// Cleaned values of the fields that passed
    pub sanitized: Map<String, Value>,
}

/// Validates question submissions against length rules and spam heuristics.
pub struct SubmissionValidator {
    text: LengthRule,
    identifier: LengthRule,
    sanitize_max_length: usize,
    spam_rules: Vec<Box<dyn SpamRule>>,
}

impl SubmissionValidator {
    /// Create a validator with the given bounds and the default spam rules.
    pub fn new(text: LengthRule, identifier: LengthRule) -> Self {
        Self {
            text,
            identifier,
            sanitize_max_length: DEFAULT_MAX_LENGTH,
            spam_rules: default_rules(),
        }
    }

    /// Build a validator from configuration.
    ///
    /// Configured patterns run after the built-in heuristics. Fails if a
    /// pattern does not compile.
    pub fn from_config(config: &SubmissionConfig, sanitize_max_length: usize) -> Result<Self> {
        let mut validator = Self::new(config.text, config.identifier);
        validator.sanitize_max_length = sanitize_max_length;
        for named in &config.blocked_patterns {
            validator.push_rule(Box::new(PatternRule::new(&named.name, &named.pattern)?));
        }
        Ok(validator)
    }

    /// Replace the spam rule set.
    pub fn with_rules(mut self, rules: Vec<Box<dyn SpamRule>>) -> Self {
        self.spam_rules = rules;
        self
    }

    /// Append a spam rule.
    pub fn push_rule(&mut self, rule: Box<dyn SpamRule>) {
        self.spam_rules.push(rule);
    }

    /// Validate a submission payload.
    ///
    /// Never stops at the first problem: every violation is reported. Fields
    /// that fail are left out of `sanitized`; non-object payloads are treated
    /// as empty.
    pub fn validate(&self, payload: &Value) -> ValidationResult {
        let empty = Map::new();
        let fields = payload.as_object().unwrap_or(&empty);

        let mut errors = Vec::new();
        let mut sanitized = Map::new();

        let text = self.check_text(fields.get(TEXT_FIELD), &mut errors);
        let identifier = self.check_identifier(fields.get(IDENTIFIER_FIELD), &mut errors);
        let anonymous = coerce_bool(fields.get(ANONYMOUS_FIELD));

        // Inserted in key order so output is stable with or without `preserve_order`.
        sanitized.insert(ANONYMOUS_FIELD.to_string(), Value::Bool(anonymous));
        if let Some(identifier) = identifier {
            sanitized.insert(IDENTIFIER_FIELD.to_string(), Value::String(identifier));
        }
        if let Some(text) = text {
            sanitized.insert(TEXT_FIELD.to_string(), Value::String(text));
        }

        trace!(errors = errors.len(), "Validated submission");

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            sanitized,
        }
    }

    fn check_text(&self, raw: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
        let text = raw.map_or_else(String::new, |v| sanitize_text_value(v, self.sanitize_max_length));
        if text.is_empty() {
            errors.push(format!("{} is required", TEXT_FIELD));
            return None;
        }

        let before = errors.len();
        self.text.check(TEXT_FIELD, &text, errors);
        for rule in &self.spam_rules {
            if rule.matches(&text) {
                errors.push(format!("{} looks like spam ({})", TEXT_FIELD, rule.name()));
            }
        }

        (errors.len() == before).then_some(text)
    }

    fn check_identifier(&self, raw: Option<&Value>, errors: &mut Vec<String>) -> Option<String> {
        let raw = match raw {
            None | Some(Value::Null) => return None,
            Some(Value::String(raw)) => raw,
            Some(_) => {
                errors.push(format!("{} must be a string", IDENTIFIER_FIELD));
                return None;
            }
        };

        let identifier = sanitize_text(raw, self.sanitize_max_length);
        let before = errors.len();
        self.identifier.check(IDENTIFIER_FIELD, &identifier, errors);
        if !IDENTIFIER_PATTERN.is_match(&identifier) {
            errors.push(format!(
                "{} may only contain letters, digits, '_' and '-'",
                IDENTIFIER_FIELD
            ));
        }

        (errors.len() == before).then_some(identifier)
    }
}

impl Default for SubmissionValidator {
    fn default() -> Self {
        Self::new(default_text_rule(), default_identifier_rule())
    }
}

impl std::fmt::Debug for SubmissionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<&str> = self.spam_rules.iter().map(|r| r.name()).collect();
        f.debug_struct("SubmissionValidator")
            .field("text", &self.text)
            .field("identifier", &self.identifier)
            .field("sanitize_max_length", &self.sanitize_max_length)
            .field("spam_rules", &rules)
            .finish()
    }
}

/// Coerce a loosely typed flag to a boolean.
fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Validate a submission with the default rules.
pub fn validate_submission(payload: &Value) -> ValidationResult {
    static DEFAULT: LazyLock<SubmissionValidator> = LazyLock::new(SubmissionValidator::default);
    DEFAULT.validate(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules::RepeatedCharacters;
    use serde_json::json;

    #[test]
    fn test_valid_submission() {
        let result = validate_submission(&json!({
            "text": "  Will the presentations be recorded?  ",
            "session_id": "keynote_2026-a",
            "anonymous": true,
        }));

        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.sanitized["text"], "Will the presentations be recorded?");
        assert_eq!(result.sanitized["session_id"], "keynote_2026-a");
        assert_eq!(result.sanitized["anonymous"], true);
    }

    #[test]
    fn test_anonymous_defaults_to_false() {
        let result = validate_submission(&json!({"text": "Will the presentations be recorded?"}));
        assert!(result.is_valid);
        assert_eq!(
            Value::Object(result.sanitized),
            json!({"text": "Will the presentations be recorded?", "anonymous": false})
        );
    }

    #[test]
    fn test_text_required() {
        for payload in [json!({}), json!({"text": "   "}), json!({"text": 12345}), json!("text")] {
            let result = validate_submission(&payload);
            assert!(!result.is_valid);
            assert_eq!(result.errors, vec!["text is required"]);
            assert!(!result.sanitized.contains_key("text"));
        }
    }

    #[test]
    fn test_text_length_after_sanitization() {
        let result = validate_submission(&json!({"text": "<<<>>>short"}));
        assert_eq!(result.errors, vec!["text must be at least 10 characters"]);

        let long = "Is there a talk on this? ".repeat(25);
        let result = validate_submission(&json!({"text": long}));
        assert_eq!(result.errors, vec!["text must be at most 500 characters"]);
    }

    #[test]
    fn test_spam_rules_reported() {
        let result = validate_submission(&json!({"text": "FREE TICKETS AT WWW.SCAM!!!!!"}));
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "text looks like spam (repeated characters)",
                "text looks like spam (all caps)",
                "text looks like spam (links or mentions)",
            ]
        );
    }

    #[test]
    fn test_accumulates_all_errors() {
        let result = validate_submission(&json!({"text": "hi", "session_id": "a"}));

        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "text must be at least 10 characters",
                "session_id must be at least 3 characters",
            ]
        );
        assert_eq!(result.sanitized.len(), 1);
        assert_eq!(result.sanitized["anonymous"], false);
    }

    #[test]
    fn test_identifier_rules() {
        let text = "What time does the keynote start?";

        let result = validate_submission(&json!({"text": text, "session_id": "room 101"}));
        assert_eq!(
            result.errors,
            vec!["session_id may only contain letters, digits, '_' and '-'"]
        );

        let result = validate_submission(&json!({"text": text, "session_id": "x".repeat(51)}));
        assert_eq!(result.errors, vec!["session_id must be at most 50 characters"]);

        let result = validate_submission(&json!({"text": text, "session_id": 7}));
        assert_eq!(result.errors, vec!["session_id must be a string"]);

        let result = validate_submission(&json!({"text": text, "session_id": null}));
        assert!(result.is_valid);
        assert!(!result.sanitized.contains_key("session_id"));
    }

    #[test]
    fn test_identifier_is_sanitized_first() {
        let result = validate_submission(&json!({
            "text": "What time does the keynote start?",
            "session_id": " <track-1> ",
        }));
        assert!(result.is_valid);
        assert_eq!(result.sanitized["session_id"], "track-1");
    }

    #[test]
    fn test_anonymous_coercion() {
        let text = "What time does the keynote start?";
        let cases = [
            (json!(true), true),
            (json!(false), false),
            (json!("yes"), true),
            (json!("TRUE"), true),
            (json!("no"), false),
            (json!(1), true),
            (json!(0), false),
            (json!(null), false),
            (json!({"nested": true}), false),
        ];

        for (flag, expected) in cases {
            let result = validate_submission(&json!({"text": text, "anonymous": flag}));
            assert!(result.is_valid);
            assert_eq!(result.sanitized["anonymous"], expected, "flag {:?}", flag);
        }
    }

    #[test]
    fn test_custom_rule_set() {
        let validator = SubmissionValidator::default()
            .with_rules(vec![Box::new(RepeatedCharacters { min_run: 3 })]);

        let result = validator.validate(&json!({"text": "Is it sooo late? @host"}));
        assert_eq!(result.errors, vec!["text looks like spam (repeated characters)"]);
    }

    #[test]
    fn test_from_config() {
        let config = SubmissionConfig {
            text: LengthRule::new(5, 20),
            identifier: LengthRule::new(1, 4),
            blocked_patterns: vec![NamedPattern {
                name: "competitor".to_string(),
                pattern: r"(?i)othercon".to_string(),
            }],
        };
        let validator = SubmissionValidator::from_config(&config, 1000).unwrap();

        let result = validator.validate(&json!({"text": "Better than OtherCon?", "session_id": "ab"}));
        assert_eq!(
            result.errors,
            vec![
                "text must be at most 20 characters",
                "text looks like spam (competitor)",
            ]
        );
        assert_eq!(result.sanitized["session_id"], "ab");
    }
}
