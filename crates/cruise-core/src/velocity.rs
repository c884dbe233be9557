//! Consumption velocity and usage-pattern classification.
//!
//! Pure functions over an ordered window of usage logs. The window is cut
//! into twelve equal trend buckets; the bucket shape drives the pattern
//! classification and the forward projection used by the prediction engine.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions,
    reason = "token counts and bucket indexes round-trip through f64"
)]

use cruise_types::models::{UsageLog, UsagePattern, VelocityStats, TREND_BUCKETS};

/// Trend stddev above `mean * BURST_RATIO` classifies as burst.
const BURST_RATIO: f64 = 0.5;

/// Acceleration below `-mean * DECLINE_RATIO` classifies as declining.
const DECLINE_RATIO: f64 = 0.2;

/// Compute velocity stats over logs covering a `window_minutes` window.
pub fn compute(logs: &[UsageLog], window_minutes: f64) -> VelocityStats {
    if logs.is_empty() || window_minutes <= 0.0 {
        return VelocityStats::default();
    }

    let total_tokens: u64 = logs.iter().map(|log| log.input_tokens + log.output_tokens).sum();
    let tokens_per_minute = total_tokens as f64 / window_minutes;

    let (trend, buckets_with_data) = build_trend(logs, total_tokens);
    let acceleration = if buckets_with_data < 3 {
        0.0
    } else {
        let n = TREND_BUCKETS;
        (trend[n - 1] - trend[n - 2]) - (trend[n - 2] - trend[n - 3])
    };

    VelocityStats {
        tokens_per_minute,
        tokens_per_hour: tokens_per_minute * 60.0,
        pattern: classify(&trend, acceleration),
        trend,
        acceleration,
    }
}

/// Project tokens consumed over the next `minutes_ahead`, shaped by the
/// classified pattern.
pub fn project_usage(stats: &VelocityStats, minutes_ahead: f64) -> f64 {
    match stats.pattern {
        UsagePattern::Declining => {
            let decay = (1.0 - 0.1 * minutes_ahead / 60.0).max(0.0);
            stats.tokens_per_minute * minutes_ahead * decay
        }
        UsagePattern::Burst => stats.tokens_per_minute * minutes_ahead * 1.2,
        UsagePattern::Steady => {
            (stats.tokens_per_minute + stats.acceleration / 2.0 * minutes_ahead / 60.0)
                * minutes_ahead
        }
    }
}

/// Bucket the logs into twelve equal time slices. Returns the trend and the
/// number of buckets that received at least one log.
fn build_trend(logs: &[UsageLog], total_tokens: u64) -> (Vec<f64>, usize) {
    let mut trend = vec![0.0; TREND_BUCKETS];

    let oldest = logs.iter().map(|log| log.timestamp).min().unwrap_or(0);
    let newest = logs.iter().map(|log| log.timestamp).max().unwrap_or(0);

    if newest == oldest {
        // All logs at one instant: spread the mean across every bucket.
        let mean = total_tokens as f64 / logs.len() as f64;
        trend.fill(mean);
        return (trend, TREND_BUCKETS);
    }

    let bucket_size = (newest - oldest) as f64 / TREND_BUCKETS as f64;
    let mut occupied = [false; TREND_BUCKETS];
    for log in logs {
        let index = (((log.timestamp - oldest) as f64 / bucket_size) as usize)
            .min(TREND_BUCKETS - 1);
        trend[index] += (log.input_tokens + log.output_tokens) as f64;
        occupied[index] = true;
    }

    (trend, occupied.iter().filter(|seen| **seen).count())
}

fn classify(trend: &[f64], acceleration: f64) -> UsagePattern {
    let mean = trend.iter().sum::<f64>() / trend.len() as f64;
    let variance =
        trend.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / trend.len() as f64;

    if variance.sqrt() > mean * BURST_RATIO {
        UsagePattern::Burst
    } else if acceleration < -mean * DECLINE_RATIO {
        UsagePattern::Declining
    } else {
        UsagePattern::Steady
    }
}
