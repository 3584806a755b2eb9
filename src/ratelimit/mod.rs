//! Rate limiting logic and state management.

mod clock;
mod limiter;
mod registry;
mod rules;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use registry::LimiterRegistry;
pub use rules::{ActionRules, LimitRule, BOOKMARKS, GENERAL, QUESTIONS, VOTES};
pub use window::SlidingWindow;
