//! Data model for the usage ledger and prediction engine.

mod prediction;
mod session;
mod usage;

pub use prediction::{Prediction, RecommendedAction, UsagePattern, VelocityStats, TREND_BUCKETS};
pub use session::Session;
pub use usage::{
    LearnedLimit, NewRateLimitEvent, NewRoutingDecision, NewUsageLog, RateLimitEvent,
    RoutingDecision, Timeframe, UsageLog, UsageTotals,
};
