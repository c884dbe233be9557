//! Prediction engine: projects window consumption against the learned
//! quota ceiling and recommends a routing action.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions,
    reason = "token counts and confidence blend through f64"
)]

use cruise_types::models::{
    NewRateLimitEvent, Prediction, RateLimitEvent, RecommendedAction, UsagePattern,
};
use cruise_types::ProxyError;
use std::sync::Arc;

use crate::ledger::UsageLedger;
use crate::limits::LimitLearner;
use crate::{now_ms, velocity};

/// Reported at external-interface boundaries when the time to exhaustion is
/// unbounded but a finite number is required.
pub const UNBOUNDED_MINUTES: f64 = 999.0;

/// Default observation window, matching the provider's rolling quota window.
pub const DEFAULT_WINDOW_HOURS: u32 = 5;

const PAUSE_MINUTES: f64 = 10.0;
const PAUSE_PERCENT: f64 = 95.0;
const PROVIDER_SWITCH_PERCENT: f64 = 85.0;
const MODEL_SWITCH_PERCENT: f64 = 70.0;

pub struct PredictionEngine {
    ledger: Arc<UsageLedger>,
    learner: Arc<LimitLearner>,
}

impl PredictionEngine {
    pub fn new(ledger: Arc<UsageLedger>, learner: Arc<LimitLearner>) -> Self {
        Self { ledger, learner }
    }

    /// Predict consumption for `model` over the trailing window.
    pub async fn predict(&self, window_hours: u32, model: &str) -> Result<Prediction, ProxyError> {
        let logs = self.ledger.get_window_logs(window_hours).await?;
        let learned = self.learner.get_learned_limit(model);

        let current_usage: u64 =
            logs.iter().map(|log| log.input_tokens + log.output_tokens).sum();
        let velocity = velocity::compute(&logs, f64::from(window_hours) * 60.0);

        let token_limit = learned.token_limit.max(1);
        let usage_percent = (current_usage as f64 / token_limit as f64 * 100.0).min(100.0);
        let tokens_remaining = learned.token_limit.saturating_sub(current_usage);

        let (minutes_until_limit, estimated_limit_time) = if velocity.tokens_per_minute > 0.0 {
            let minutes = tokens_remaining as f64 / velocity.tokens_per_minute;
            (Some(minutes), Some(now_ms() + (minutes * 60_000.0) as i64))
        } else {
            (None, None)
        };

        let confidence =
            ((u64::from(learned.confidence) + (logs.len() as u64 * 2).min(100)) / 2) as u8;

        let recommended_action = recommend(usage_percent, minutes_until_limit, velocity.pattern);

        Ok(Prediction {
            usage_percent,
            current_usage,
            token_limit: learned.token_limit,
            tokens_remaining,
            minutes_until_limit,
            estimated_limit_time,
            confidence,
            recommended_action,
            velocity,
        })
    }

    /// Record a quota-rejection: persists the event and updates the learned
    /// ceiling for the originally requested model.
    pub async fn record_rate_limit(
        &self,
        event: NewRateLimitEvent,
    ) -> Result<RateLimitEvent, ProxyError> {
        self.learner.record_rate_limit(event).await
    }
}

/// Action table: pause near exhaustion, otherwise step down through
/// provider and model switches as pressure rises.
fn recommend(
    usage_percent: f64,
    minutes_until_limit: Option<f64>,
    pattern: UsagePattern,
) -> RecommendedAction {
    let minutes = minutes_until_limit.unwrap_or(f64::INFINITY);
    if minutes < PAUSE_MINUTES || usage_percent > PAUSE_PERCENT {
        RecommendedAction::Pause
    } else if usage_percent > PROVIDER_SWITCH_PERCENT
        || (pattern == UsagePattern::Burst && usage_percent > MODEL_SWITCH_PERCENT)
    {
        RecommendedAction::SwitchProvider
    } else if usage_percent > MODEL_SWITCH_PERCENT {
        RecommendedAction::SwitchModel
    } else {
        RecommendedAction::Continue
    }
}
