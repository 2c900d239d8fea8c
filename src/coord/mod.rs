//! Cross-agent coordination services
//!
//! Shared by every controller in the fleet: the LLM rate limiter, the leased
//! lock manager, and the admission limiters for skills and exploration. Each
//! service guards its state with a single mutex and exposes one public
//! mutation surface.

mod admission;
mod locks;
mod rate_limit;

pub use admission::{ExplorerLimiter, SkillLimiter};
pub use locks::{LockAction, LockLease, LockManager};
pub use rate_limit::{RateDecision, RateDenyReason, RateLimiter};
