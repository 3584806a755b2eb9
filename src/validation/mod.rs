//! Submission validation.

mod rules;
mod submission;

pub use rules::{default_rules, LinksAndMentions, PatternRule, RepeatedCharacters, Shouting, SpamRule};
pub use submission::{
    validate_submission, LengthRule, NamedPattern, SubmissionConfig, SubmissionValidator,
    ValidationResult, ANONYMOUS_FIELD, IDENTIFIER_FIELD, TEXT_FIELD,
};
