//! Spam heuristics over sanitized text.
//!
//! Heuristics are approximate and language-specific, so they are an ordered
//! list of [`SpamRule`] trait objects that callers can replace wholesale.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{AdmissionError, Result};

/// A predicate that flags text as spam.
pub trait SpamRule: Send + Sync {
    /// Short name reported in validation errors.
    fn name(&self) -> &str;

    /// Whether `text` trips this rule.
    fn matches(&self, text: &str) -> bool;
}

/// Flags any character repeated `min_run` or more times in a row.
#[derive(Debug, Clone)]
pub struct RepeatedCharacters {
    pub min_run: usize,
}

impl Default for RepeatedCharacters {
    fn default() -> Self {
        Self { min_run: 5 }
    }
}

impl SpamRule for RepeatedCharacters {
    fn name(&self) -> &str {
        "repeated characters"
    }

    fn matches(&self, text: &str) -> bool {
        let mut previous = None;
        let mut run = 0;

        for c in text.chars() {
            if Some(c) == previous {
                run += 1;
            } else {
                previous = Some(c);
                run = 1;
            }
            if run >= self.min_run {
                return true;
            }
        }
        false
    }
}

/// Flags long text with uppercase letters and no lowercase ones.
#[derive(Debug, Clone)]
pub struct Shouting {
    pub min_length: usize,
}

impl Default for Shouting {
    fn default() -> Self {
        Self { min_length: 20 }
    }
}

impl SpamRule for Shouting {
    fn name(&self) -> &str {
        "all caps"
    }

    fn matches(&self, text: &str) -> bool {
        text.chars().count() >= self.min_length
            && text.chars().any(char::is_uppercase)
            && !text.chars().any(char::is_lowercase)
    }
}

static LINK_OR_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b[a-z][a-z0-9+.\-]*://|\bwww\.|\b[a-z0-9\-]+\.(?:com|net|org|io|dev|app|co|info|biz|xyz|ly|me|ru)\b|@\w+",
    )
    .expect("valid link pattern")
});

/// Flags URL-like substrings and `@mentions`.
#[derive(Debug, Clone, Default)]
pub struct LinksAndMentions;

impl SpamRule for LinksAndMentions {
    fn name(&self) -> &str {
        "links or mentions"
    }

    fn matches(&self, text: &str) -> bool {
        LINK_OR_MENTION.is_match(text)
    }
}

/// A named regular expression rule, typically loaded from configuration.
#[derive(Debug, Clone)]
pub struct PatternRule {
    name: String,
    pattern: Regex,
}

impl PatternRule {
    /// Compile a pattern rule.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| AdmissionError::Config(format!("Invalid spam pattern '{}': {}", name, e)))?;
        Ok(Self { name, pattern })
    }
}

impl SpamRule for PatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// The default rule set, in evaluation order.
pub fn default_rules() -> Vec<Box<dyn SpamRule>> {
    vec![
        Box::new(RepeatedCharacters::default()),
        Box::new(Shouting::default()),
        Box::new(LinksAndMentions),
    ]
}
