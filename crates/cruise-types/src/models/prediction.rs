//! Prediction output types: velocity, usage patterns, recommended actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of trend buckets in a velocity window.
pub const TREND_BUCKETS: usize = 12;

/// Consumption shape over the observation window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsagePattern {
    Burst,
    #[default]
    Steady,
    Declining,
}

impl fmt::Display for UsagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsagePattern::Burst => write!(f, "burst"),
            UsagePattern::Steady => write!(f, "steady"),
            UsagePattern::Declining => write!(f, "declining"),
        }
    }
}

/// Windowed consumption rate and trend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VelocityStats {
    pub tokens_per_minute: f64,
    pub tokens_per_hour: f64,
    /// Exactly [`TREND_BUCKETS`] buckets of input+output tokens
    pub trend: Vec<f64>,
    /// Second difference over the last three trend buckets
    pub acceleration: f64,
    pub pattern: UsagePattern,
}

impl Default for VelocityStats {
    fn default() -> Self {
        Self {
            tokens_per_minute: 0.0,
            tokens_per_hour: 0.0,
            trend: vec![0.0; TREND_BUCKETS],
            acceleration: 0.0,
            pattern: UsagePattern::Steady,
        }
    }
}

/// What the proxy should do with the next request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    #[default]
    Continue,
    SwitchModel,
    SwitchProvider,
    Pause,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedAction::Continue => write!(f, "continue"),
            RecommendedAction::SwitchModel => write!(f, "switch_model"),
            RecommendedAction::SwitchProvider => write!(f, "switch_provider"),
            RecommendedAction::Pause => write!(f, "pause"),
        }
    }
}

/// Output of the prediction engine for one model and window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Percentage of the learned ceiling consumed, clamped to [0, 100]
    pub usage_percent: f64,
    /// Sum of input+output tokens over the window
    pub current_usage: u64,
    /// The learned (or default) quota ceiling
    pub token_limit: u64,
    pub tokens_remaining: u64,
    /// None when consumption velocity is zero (unbounded)
    pub minutes_until_limit: Option<f64>,
    /// Epoch ms at which the ceiling is projected to be hit
    pub estimated_limit_time: Option<i64>,
    /// 0-100, blend of limit confidence and sample size
    pub confidence: u8,
    pub recommended_action: RecommendedAction,
    pub velocity: VelocityStats,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            usage_percent: 0.0,
            current_usage: 0,
            token_limit: 0,
            tokens_remaining: 0,
            minutes_until_limit: None,
            estimated_limit_time: None,
            confidence: 0,
            recommended_action: RecommendedAction::Continue,
            velocity: VelocityStats::default(),
        }
    }
}
