//! Request metering: usage extraction from upstream bodies and
//! failure-tolerant ledger writes.
//!
//! Ledger failures are logged and swallowed here; a proxied response must
//! never fail because accounting did.

use cruise_types::models::{NewRoutingDecision, NewUsageLog};
use serde_json::Value;
use std::time::Instant;

use crate::ledger::UsageLedger;
use crate::now_ms;
use crate::router::RouteTarget;

/// Token counts pulled from one upstream response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// Extract the primary-schema usage block from a response body. Missing
/// fields fall back to zero; only the primary schema is metered.
pub fn extract_usage(body: &Value) -> UsageCounts {
    let usage = match body.get("usage") {
        Some(usage) => usage,
        None => return UsageCounts::default(),
    };
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    UsageCounts {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        cache_read_tokens: field("cache_read_input_tokens"),
        cache_write_tokens: field("cache_creation_input_tokens"),
    }
}

/// Pull the upstream error classification out of an error body, when the
/// body follows the `{"error": {"type": ...}}` convention.
pub fn extract_error_type(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("error")?
        .get("type")?
        .as_str()
        .map(str::to_string)
}

/// Everything the meter needs to write one usage log row.
pub struct RequestRecord {
    /// Effective target model (sent upstream)
    pub model: String,
    pub provider: String,
    pub started: Instant,
    pub routed_from: Option<String>,
    pub routing_reason: Option<String>,
}

impl RequestRecord {
    pub fn from_target(target: &RouteTarget, requested_model: &str, started: Instant) -> Self {
        Self {
            model: target.model.clone(),
            provider: target.provider.clone(),
            started,
            routed_from: target.should_route.then(|| requested_model.to_string()),
            routing_reason: target.should_route.then(|| target.reason.clone()),
        }
    }
}

/// Write one usage log row. Never fails the caller.
pub async fn record_usage(
    ledger: &UsageLedger,
    record: &RequestRecord,
    counts: UsageCounts,
    success: bool,
    error_type: Option<String>,
) {
    let entry = NewUsageLog {
        timestamp: now_ms(),
        model: record.model.clone(),
        provider: record.provider.clone(),
        input_tokens: counts.input_tokens,
        output_tokens: counts.output_tokens,
        cache_read_tokens: counts.cache_read_tokens,
        cache_write_tokens: counts.cache_write_tokens,
        latency_ms: u64::try_from(record.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        success,
        error_type,
        routed_from: record.routed_from.clone(),
        routing_reason: record.routing_reason.clone(),
    };

    if let Err(err) = ledger.add_log(entry).await {
        tracing::error!("Failed to write usage log: {}", err);
    }
}

/// Persist a routing decision. Never fails the caller.
pub async fn record_routing_decision(
    ledger: &UsageLedger,
    target: &RouteTarget,
    original_provider: &str,
) {
    let decision = NewRoutingDecision {
        timestamp: now_ms(),
        original_provider: original_provider.to_string(),
        routed_provider: target.provider.clone(),
        routed_model: target.model.clone(),
        reason: target.reason.clone(),
        estimated_savings: target.estimated_savings,
    };

    if let Err(err) = ledger.add_routing_decision(decision).await {
        tracing::error!("Failed to write routing decision: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_primary_usage_block() {
        let body = json!({
            "id": "msg_1",
            "usage": {
                "input_tokens": 10,
                "output_tokens": 20,
                "cache_read_input_tokens": 5,
                "cache_creation_input_tokens": 3,
            }
        });
        let counts = extract_usage(&body);
        assert_eq!(counts.input_tokens, 10);
        assert_eq!(counts.output_tokens, 20);
        assert_eq!(counts.cache_read_tokens, 5);
        assert_eq!(counts.cache_write_tokens, 3);
    }

    #[test]
    fn missing_usage_falls_back_to_zeros() {
        assert_eq!(extract_usage(&json!({"id": "msg_1"})), UsageCounts::default());
        assert_eq!(extract_usage(&json!({"usage": {}})), UsageCounts::default());
    }

    #[test]
    fn error_type_from_error_body() {
        let body = br#"{"error": {"type": "rate_limit_exceeded", "message": "slow down"}}"#;
        assert_eq!(extract_error_type(body), Some("rate_limit_exceeded".to_string()));
        assert_eq!(extract_error_type(b"not json"), None);
        assert_eq!(extract_error_type(br#"{"error": {}}"#), None);
    }
}
