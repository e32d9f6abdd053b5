pub mod compliance;
pub mod exposure;
pub mod position_sizer;
pub mod rate_limiter;

pub use compliance::{ComplianceChecker, ComplianceViolation};
pub use exposure::ExposureTracker;
pub use position_sizer::PositionSizer;
pub use rate_limiter::RateLimiter;
