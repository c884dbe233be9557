//! Read-only aggregated view of the ledger and prediction output.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::prediction::{DEFAULT_WINDOW_HOURS, UNBOUNDED_MINUTES};
use crate::proxy::server::AppState;
use cruise_types::models::Timeframe;
use cruise_types::{ProxyError, DEFAULT_SONNET_MODEL};

pub async fn handle_stats(State(state): State<AppState>) -> Response {
    match build_stats(&state).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => {
            tracing::error!("Failed to build stats: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn build_stats(state: &AppState) -> Result<serde_json::Value, ProxyError> {
    let session = state.ledger.get_total_usage(Timeframe::Session).await?;
    let today = state.ledger.get_total_usage(Timeframe::Today).await?;
    let week = state.ledger.get_total_usage(Timeframe::Week).await?;
    let saved = state.ledger.get_routing_savings(Timeframe::Session).await?;

    let router = state.router.get_status().await;
    let model = router
        .current_model
        .clone()
        .unwrap_or_else(|| DEFAULT_SONNET_MODEL.to_string());
    let prediction = state.prediction.predict(DEFAULT_WINDOW_HOURS, &model).await?;

    Ok(json!({
        "usage": {
            "input_tokens": session.input_tokens,
            "output_tokens": session.output_tokens,
            "cache_read_tokens": session.cache_read_tokens,
            "cache_write_tokens": session.cache_write_tokens,
            "session_cost": session.total_cost,
            "today_cost": today.total_cost,
            "week_cost": week.total_cost,
            "saved_by_routing": saved,
        },
        "prediction": {
            "usage_percent": prediction.usage_percent,
            "minutes_until_limit": prediction.minutes_until_limit.unwrap_or(UNBOUNDED_MINUTES),
            "velocity": prediction.velocity.tokens_per_hour,
            "confidence": prediction.confidence,
            "trend": prediction.velocity.trend,
        },
        "session": {
            "requests": session.request_count,
        },
        "router": router,
    }))
}
