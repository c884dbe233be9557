//! Streaming pass-through with concurrent usage extraction.
//!
//! Upstream chunks are forwarded to the client verbatim; each chunk is also
//! decoded as UTF-8 text and scanned for token counts, the last match
//! winning. The usage log row is written when the upstream stream closes,
//! before the body reports completion to the client. If the client
//! disconnects mid-stream the write is abandoned with the stream.
//
// TODO: parse SSE frames and treat the terminal message_delta/message_stop
// usage as authoritative; the chunk-level scan misses counts split across
// chunk boundaries.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

use super::meter::{self, RequestRecord, UsageCounts};
use crate::ledger::UsageLedger;
use crate::router::RouteTarget;
use cruise_types::ProxyError;

static INPUT_TOKENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""input_tokens"\s*:\s*(\d+)"#).expect("valid regex"));
static OUTPUT_TOKENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""output_tokens"\s*:\s*(\d+)"#).expect("valid regex"));

/// Accumulated counts scanned off the wire. Later matches overwrite
/// earlier ones.
#[derive(Debug, Default)]
struct UsageScan {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl UsageScan {
    fn scan(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        if let Some(value) = last_match(&INPUT_TOKENS_RE, &text) {
            self.input_tokens = Some(value);
        }
        if let Some(value) = last_match(&OUTPUT_TOKENS_RE, &text) {
            self.output_tokens = Some(value);
        }
    }

    fn counts(&self) -> UsageCounts {
        UsageCounts {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
            ..UsageCounts::default()
        }
    }
}

fn last_match(regex: &Regex, text: &str) -> Option<u64> {
    regex
        .captures_iter(text)
        .last()
        .and_then(|captures| captures.get(1))
        .and_then(|group| group.as_str().parse().ok())
}

struct RelayState {
    upstream: futures::stream::BoxStream<'static, reqwest::Result<Bytes>>,
    scan: UsageScan,
    ledger: Arc<UsageLedger>,
    record: RequestRecord,
    decision: Option<(RouteTarget, String)>,
}

impl RelayState {
    async fn finalize(&mut self, success: bool, error_type: Option<&str>) {
        meter::record_usage(
            &self.ledger,
            &self.record,
            self.scan.counts(),
            success,
            error_type.map(str::to_string),
        )
        .await;

        if let Some((target, original_provider)) = self.decision.take() {
            meter::record_routing_decision(&self.ledger, &target, &original_provider).await;
        }
    }
}

/// Relay an upstream streaming response to the client.
///
/// `decision`, when present, is persisted together with the usage log once
/// the stream completes.
pub fn relay(
    upstream: reqwest::Response,
    ledger: Arc<UsageLedger>,
    record: RequestRecord,
    decision: Option<(RouteTarget, String)>,
) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/event-stream")
        .to_string();

    let state = RelayState {
        upstream: upstream.bytes_stream().boxed(),
        scan: UsageScan::default(),
        ledger,
        record,
        decision,
    };

    let body_stream = futures::stream::unfold(state, |mut state| async move {
        match state.upstream.next().await {
            Some(Ok(chunk)) => {
                state.scan.scan(&chunk);
                Some((Ok::<Bytes, std::io::Error>(chunk), state))
            }
            Some(Err(err)) => {
                // Bytes already flushed to the client are not retracted.
                let err = ProxyError::StreamError { message: err.to_string() };
                tracing::warn!("Mid-flight: {}", err);
                state.finalize(false, Some(err.error_type())).await;
                None
            }
            None => {
                state.finalize(true, None).await;
                None
            }
        }
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|err| {
            tracing::error!("Failed to build streaming response: {}", err);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        })
}
