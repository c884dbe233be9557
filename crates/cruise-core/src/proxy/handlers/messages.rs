//! The core proxied call: parse, route, translate, forward, meter.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use std::time::Instant;

use crate::adapters::{self, ParsedRequest};
use crate::now_ms;
use crate::prediction::DEFAULT_WINDOW_HOURS;
use crate::proxy::server::AppState;
use crate::proxy::streaming;
use crate::proxy::meter::{self, RequestRecord, UsageCounts};
use cruise_types::models::{NewRateLimitEvent, Prediction};
use cruise_types::{ProviderKind, ProxyError};

pub async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", &format!("invalid JSON body: {err}")),
    };
    let request = match ParsedRequest::from_body(body) {
        Ok(request) => request,
        Err(err) => return proxy_error_response(&err),
    };

    // Routing reads the ledger; a degraded ledger must not take the proxy
    // down, so prediction failures fall back to no-routing.
    let prediction = match state
        .prediction
        .predict(DEFAULT_WINDOW_HOURS, &request.model)
        .await
    {
        Ok(prediction) => prediction,
        Err(err) => {
            tracing::warn!("Prediction unavailable, forwarding unrouted: {}", err);
            Prediction::default()
        }
    };

    let target = state.router.route(&request.model, &prediction).await;
    if target.should_route {
        tracing::info!(
            "Routing {} -> {} on {}: {}",
            request.model,
            target.model,
            target.provider,
            target.reason
        );
    }

    let client_key = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    let beta_header = headers.get("anthropic-beta").and_then(|value| value.to_str().ok());
    let effective_key = match target.kind {
        ProviderKind::Primary => client_key.or(target.api_key.as_deref()),
        _ => target.api_key.as_deref(),
    };

    let record = RequestRecord::from_target(&target, &request.model, started);

    let upstream = match adapters::dispatch(
        &state.upstream,
        &target,
        &request,
        effective_key,
        beta_header,
    )
    .await
    {
        Ok(response) => response,
        // No upstream call was made: no ledger row.
        Err(err @ ProxyError::MissingCredential { .. }) => return proxy_error_response(&err),
        Err(err) => {
            tracing::error!("Upstream call failed: {}", err);
            meter::record_usage(
                &state.ledger,
                &record,
                UsageCounts::default(),
                false,
                Some(err.error_type().to_string()),
            )
            .await;
            return proxy_error_response(&err);
        }
    };

    let status = upstream.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return handle_quota_rejection(&state, &request, &record, upstream).await;
    }

    if !status.is_success() {
        let bytes = upstream.bytes().await.unwrap_or_default();
        let error_type = meter::extract_error_type(&bytes)
            .unwrap_or_else(|| "upstream_error".to_string());
        meter::record_usage(
            &state.ledger,
            &record,
            UsageCounts::default(),
            false,
            Some(error_type),
        )
        .await;
        return passthrough_body(status, bytes);
    }

    if request.stream {
        let decision = target
            .should_route
            .then(|| (target.clone(), cruise_types::config::PRIMARY_PROVIDER.to_string()));
        return streaming::relay(upstream, state.ledger.clone(), record, decision);
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            let err = ProxyError::StreamError { message: err.to_string() };
            tracing::error!("Failed to read upstream body: {}", err);
            meter::record_usage(
                &state.ledger,
                &record,
                UsageCounts::default(),
                false,
                Some(err.error_type().to_string()),
            )
            .await;
            return proxy_error_response(&err);
        }
    };

    let counts = serde_json::from_slice::<Value>(&bytes)
        .map(|parsed| meter::extract_usage(&parsed))
        .unwrap_or_default();
    meter::record_usage(&state.ledger, &record, counts, true, None).await;

    if target.should_route {
        meter::record_routing_decision(
            &state.ledger,
            &target,
            cruise_types::config::PRIMARY_PROVIDER,
        )
        .await;
    }

    passthrough_body(status, bytes)
}

/// A quota-rejection toggles router state and teaches the limit learner;
/// the client still sees the upstream body and status verbatim.
async fn handle_quota_rejection(
    state: &AppState,
    request: &ParsedRequest,
    record: &RequestRecord,
    upstream: reqwest::Response,
) -> Response {
    let retry_after = upstream
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u32>().ok());
    let reset_time = retry_after.map(|seconds| now_ms() + i64::from(seconds) * 1000);
    let rate_limited = ProxyError::RateLimited {
        provider: record.provider.clone(),
        retry_after_secs: retry_after.map(u64::from),
    };
    tracing::warn!("{}", rate_limited);

    let bytes = upstream.bytes().await.unwrap_or_default();
    let error_type = meter::extract_error_type(&bytes)
        .unwrap_or_else(|| rate_limited.error_type().to_string());

    let tokens_before_limit = match state
        .ledger
        .get_window_token_sum(DEFAULT_WINDOW_HOURS)
        .await
    {
        Ok(sum) => sum,
        Err(err) => {
            tracing::error!("Failed to sum rate-limit window: {}", err);
            0
        }
    };

    if let Err(err) = state
        .prediction
        .record_rate_limit(NewRateLimitEvent {
            timestamp: now_ms(),
            model: request.model.clone(),
            error_type: error_type.clone(),
            reset_time,
            tokens_used_before_limit: tokens_before_limit,
            window_hours: DEFAULT_WINDOW_HOURS,
        })
        .await
    {
        tracing::error!("Failed to record rate-limit event: {}", err);
    }
    state.router.clone().record_rate_limit(reset_time);

    meter::record_usage(
        &state.ledger,
        record,
        UsageCounts::default(),
        false,
        Some(error_type),
    )
    .await;

    passthrough_body(StatusCode::TOO_MANY_REQUESTS, bytes)
}

fn passthrough_body(status: StatusCode, bytes: Bytes) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}

fn proxy_error_response(err: &ProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(status, err.error_type(), &err.to_string())
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "type": "error",
            "error": { "type": error_type, "message": message }
        })),
    )
        .into_response()
}
