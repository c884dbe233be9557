//! Catch-all forwarder: any other `/v1/*` path goes to the primary
//! provider unchanged, preserving method, body, and the credential and
//! version headers.

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::proxy::server::AppState;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_FORWARD_BODY_BYTES: usize = 100 * 1024 * 1024;

pub async fn handle_passthrough(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with("/v1/") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let primary = match state.router.primary_provider().await {
        Some(primary) => primary,
        None => {
            return (StatusCode::SERVICE_UNAVAILABLE, "no primary provider configured")
                .into_response()
        }
    };

    let method = request.method().clone();
    let query = request
        .uri()
        .query()
        .map(|query| format!("?{query}"))
        .unwrap_or_default();
    let url = format!("{}{}{}", primary.endpoint, path, query);

    let headers = request.headers().clone();
    let body = match to_bytes(request.into_body(), MAX_FORWARD_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read body: {err}"))
                .into_response()
        }
    };

    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(primary.api_key);
    let version = headers
        .get("anthropic-version")
        .and_then(|value| value.to_str().ok())
        .unwrap_or(ANTHROPIC_VERSION);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json");

    let mut builder = state
        .upstream
        .request(method, &url)
        .header("anthropic-version", version)
        .header(header::CONTENT_TYPE.as_str(), content_type)
        .body(body.to_vec());
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }

    let upstream = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("Pass-through to {} failed: {}", url, err);
            return (StatusCode::BAD_GATEWAY, format!("upstream unavailable: {err}"))
                .into_response();
        }
    };

    let status = upstream.status();
    let upstream_content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let bytes = upstream.bytes().await.unwrap_or_default();

    (status, [(header::CONTENT_TYPE, upstream_content_type)], bytes).into_response()
}
