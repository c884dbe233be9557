//! Learned per-model quota ceilings.
//!
//! The learner keeps a running-average estimate of how many tokens each
//! model can consume inside the provider's rolling window before a
//! quota-rejection arrives. State is in-memory only; it is rebuilt from the
//! ledger's rate-limit events on startup.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions,
    reason = "token averages are floored back into u64 ceilings"
)]

use cruise_types::models::{LearnedLimit, NewRateLimitEvent, RateLimitEvent};
use cruise_types::{pricing, ProxyError};
use dashmap::DashMap;
use std::sync::Arc;

use crate::ledger::UsageLedger;
use crate::now_ms;

/// Learned ceilings are scaled down so routing kicks in before the real
/// limit is reached.
const SAFETY_FACTOR: f64 = 0.95;

/// How far back observed events are replayed at startup.
const LEARNING_WINDOW_HOURS: u32 = 30 * 24;

const CONFIDENCE_PER_EVENT: u32 = 20;
const DEFAULT_WINDOW_HOURS: u32 = 5;

pub struct LimitLearner {
    ledger: Arc<UsageLedger>,
    limits: DashMap<String, LearnedLimit>,
}

impl LimitLearner {
    /// Build the learner and replay the last 30 days of events from the
    /// ledger, oldest first, so in-memory state matches what incremental
    /// updates would have produced.
    pub async fn load(ledger: Arc<UsageLedger>) -> Result<Self, ProxyError> {
        let learner = Self { ledger, limits: DashMap::new() };

        let mut events = learner.ledger.get_rate_limit_window(LEARNING_WINDOW_HOURS).await?;
        events.reverse();
        let replayed = events.len();
        for event in &events {
            learner.apply(event);
        }

        if replayed > 0 {
            tracing::info!(
                "Limit learner replayed {} rate-limit event(s) across {} model(s)",
                replayed,
                learner.limits.len()
            );
        }

        Ok(learner)
    }

    /// Persist a quota-rejection event and fold it into the learned ceiling
    /// for its model.
    pub async fn record_rate_limit(
        &self,
        event: NewRateLimitEvent,
    ) -> Result<RateLimitEvent, ProxyError> {
        let stored = self.ledger.add_rate_limit_event(event).await?;
        self.apply(&stored);

        let learned = self.get_learned_limit(&stored.model);
        tracing::warn!(
            "Rate limit on {}: learned ceiling now {} tokens ({}% confidence)",
            stored.model,
            learned.token_limit,
            learned.confidence
        );

        Ok(stored)
    }

    /// The learned ceiling for a model, or the static default with zero
    /// confidence when nothing has been observed yet.
    pub fn get_learned_limit(&self, model: &str) -> LearnedLimit {
        self.limits.get(model).map(|entry| entry.clone()).unwrap_or_else(|| LearnedLimit {
            token_limit: pricing::default_token_limit(model),
            window_hours: DEFAULT_WINDOW_HOURS,
            confidence: 0,
            last_updated: now_ms(),
            data_points: 0,
        })
    }

    fn apply(&self, event: &RateLimitEvent) {
        let scaled = event.tokens_used_before_limit as f64 * SAFETY_FACTOR;

        let mut entry = self.limits.entry(event.model.clone()).or_insert_with(|| LearnedLimit {
            token_limit: 0,
            window_hours: event.window_hours,
            confidence: 0,
            last_updated: event.timestamp,
            data_points: 0,
        });

        let old_points = entry.data_points;
        entry.token_limit = if old_points == 0 {
            scaled.floor() as u64
        } else {
            let blended = (entry.token_limit as f64).mul_add(f64::from(old_points), scaled)
                / f64::from(old_points + 1);
            blended.floor() as u64
        };
        entry.data_points = old_points + 1;
        entry.confidence = entry.data_points.saturating_mul(CONFIDENCE_PER_EVENT).min(100) as u8;
        entry.window_hours = event.window_hours;
        entry.last_updated = event.timestamp;
    }
}
