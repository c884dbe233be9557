//! Ledger row types: usage logs, rate-limit events, routing decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry per upstream response, as persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageLog {
    /// Unique id: millisecond timestamp plus a short random suffix
    pub id: String,
    /// Epoch milliseconds at which the response was recorded
    pub timestamp: i64,
    /// Session this request belongs to
    pub session_id: String,
    /// Effective target model (after routing, the model sent upstream)
    pub model: String,
    /// Provider tag the request was sent to
    pub provider: String,
    /// Input tokens reported by the upstream
    pub input_tokens: u64,
    /// Output tokens reported by the upstream
    pub output_tokens: u64,
    /// Prompt-cache read tokens
    pub cache_read_tokens: u64,
    /// Prompt-cache write tokens
    pub cache_write_tokens: u64,
    /// Cost in USD, computed at insert time from the pricing table
    pub cost_usd: f64,
    /// Wall-clock latency of the full request
    pub latency_ms: u64,
    /// Whether the upstream returned a success status
    pub success: bool,
    /// Error classification when `success` is false
    pub error_type: Option<String>,
    /// Opaque project identifier
    pub project_path: String,
    /// Originally requested model, set only when the request was routed
    pub routed_from: Option<String>,
    /// Human-readable routing rationale, set only when routed
    pub routing_reason: Option<String>,
}

/// A usage log entry before the ledger assigns `id` and `session_id`.
#[derive(Debug, Clone, Default)]
pub struct NewUsageLog {
    pub timestamp: i64,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_type: Option<String>,
    pub routed_from: Option<String>,
    pub routing_reason: Option<String>,
}

/// One entry per observed quota-rejection from an upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitEvent {
    pub id: String,
    pub timestamp: i64,
    /// The originally requested model, not the routed one
    pub model: String,
    pub error_type: String,
    /// Upstream-declared reset instant, when known (epoch ms)
    pub reset_time: Option<i64>,
    /// Sum of input+output tokens over the learning window preceding the event
    pub tokens_used_before_limit: u64,
    /// The provider's declared rolling-window length
    pub window_hours: u32,
}

/// A rate-limit event before the ledger assigns `id`.
#[derive(Debug, Clone)]
pub struct NewRateLimitEvent {
    pub timestamp: i64,
    pub model: String,
    pub error_type: String,
    pub reset_time: Option<i64>,
    pub tokens_used_before_limit: u64,
    pub window_hours: u32,
}

/// One entry per response that actually switched provider or model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub id: String,
    pub timestamp: i64,
    pub session_id: String,
    pub original_provider: String,
    pub routed_provider: String,
    pub routed_model: String,
    /// Free text for operator visibility
    pub reason: String,
    /// USD saved on a 10,000-token nominal request
    pub estimated_savings: f64,
}

/// A routing decision before the ledger assigns `id` and `session_id`.
#[derive(Debug, Clone)]
pub struct NewRoutingDecision {
    pub timestamp: i64,
    pub original_provider: String,
    pub routed_provider: String,
    pub routed_model: String,
    pub reason: String,
    pub estimated_savings: f64,
}

/// Per-model learned quota ceiling, rebuildable from rate-limit events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LearnedLimit {
    pub token_limit: u64,
    pub window_hours: u32,
    /// 0-100; 20 per contributing event until saturation
    pub confidence: u8,
    pub last_updated: i64,
    pub data_points: u32,
}

/// Aggregation window for ledger reductions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Session,
    Today,
    Week,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Session => write!(f, "session"),
            Timeframe::Today => write!(f, "today"),
            Timeframe::Week => write!(f, "week"),
        }
    }
}

/// Reduced totals over one timeframe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_cost: f64,
    pub request_count: u64,
    /// Arithmetic mean over counted entries; 0 when `request_count` is 0
    pub avg_latency: f64,
}
