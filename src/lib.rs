//! Admission - input admission layer for a conference Q&A service
//!
//! This crate decides whether an actor may perform a write-style action
//! (posting a question, voting, toggling a bookmark) with a given payload.
//! It rate-limits per identity with sliding windows, sanitizes free text,
//! markup and URLs, and validates submissions before they reach storage.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub mod sanitize;
pub mod serve;
pub mod validation;

pub use gate::{AdmissionDecision, AdmissionGate, DecisionReason};
pub use ratelimit::{LimiterRegistry, RateLimiter};
pub use validation::{validate_submission, ValidationResult};
