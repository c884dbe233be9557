//! End-to-end proxy flows against a mocked upstream.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cruise_core::{
    build_proxy_router, AppState, LimitLearner, PredictionEngine, RequestRouter, UsageLedger,
};
use cruise_types::models::{NewUsageLog, Timeframe};
use cruise_types::{
    ProviderConfig, ProviderKind, RouterConfig, RouterMode, RouterThresholds, PRIMARY_PROVIDER,
};

struct TestHarness {
    app: axum::Router,
    ledger: Arc<UsageLedger>,
    learner: Arc<LimitLearner>,
    router: Arc<RequestRouter>,
    _dir: tempfile::TempDir,
}

async fn harness(primary_uri: &str, openrouter_uri: Option<&str>) -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = Arc::new(
        UsageLedger::open(&dir.path().join("usage.db"), "/test".to_string())
            .await
            .expect("open ledger"),
    );
    let learner = Arc::new(LimitLearner::load(ledger.clone()).await.expect("load learner"));
    let prediction = Arc::new(PredictionEngine::new(ledger.clone(), learner.clone()));

    let mut providers = vec![ProviderConfig {
        name: PRIMARY_PROVIDER.to_string(),
        kind: ProviderKind::Primary,
        endpoint: primary_uri.to_string(),
        api_key: Some("sk-test".to_string()),
        models: vec!["claude-sonnet-4-5".to_string(), "claude-haiku-4-5".to_string()],
        enabled: true,
        priority: 0,
    }];
    if let Some(uri) = openrouter_uri {
        providers.push(ProviderConfig {
            name: "openrouter".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            endpoint: uri.to_string(),
            api_key: Some("or-test".to_string()),
            models: vec!["anthropic/claude-3.5-haiku".to_string()],
            enabled: true,
            priority: 1,
        });
    }

    let router = Arc::new(RequestRouter::new(RouterConfig {
        mode: RouterMode::FullAuto,
        enabled: true,
        thresholds: RouterThresholds::default(),
        providers,
    }));

    let state = AppState::new(ledger.clone(), prediction, router.clone(), None);
    TestHarness { app: build_proxy_router(state), ledger, learner, router, _dir: dir }
}

fn messages_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body").to_vec()
}

/// Backdate `total` tokens of usage, spread over the last four hours.
/// Every seeded row is strictly older than anything logged live.
async fn seed_window_tokens(ledger: &UsageLedger, total: u64) {
    let now = chrono::Utc::now().timestamp_millis();
    let chunks = 8u64;
    for i in 0..chunks {
        ledger
            .add_log(NewUsageLog {
                timestamp: now - (i as i64 + 1) * 30 * 60_000,
                model: "claude-sonnet-4-5".to_string(),
                provider: PRIMARY_PROVIDER.to_string(),
                input_tokens: total / chunks,
                output_tokens: 0,
                latency_ms: 100,
                success: true,
                ..NewUsageLog::default()
            })
            .await
            .expect("seed");
    }
}

#[tokio::test]
async fn cold_start_forwards_verbatim_and_meters() {
    let server = MockServer::start().await;
    let upstream_body = json!({
        "id": "msg_01",
        "role": "assistant",
        "content": [{"type": "text", "text": "hello"}],
        "usage": {"input_tokens": 10, "output_tokens": 20}
    });
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), None).await;
    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let returned: Value = serde_json::from_slice(&body_bytes(response).await).expect("json");
    assert_eq!(returned, upstream_body);

    let logs = h.ledger.get_session_logs().await.expect("logs");
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.model, "claude-sonnet-4-5");
    assert_eq!(log.provider, PRIMARY_PROVIDER);
    assert_eq!(log.input_tokens, 10);
    assert_eq!(log.output_tokens, 20);
    assert!((log.cost_usd - 0.00033).abs() < 1e-9);
    assert!(log.success);
    assert_eq!(log.routed_from, None);
}

#[tokio::test]
async fn threshold_crossing_downshifts_to_haiku() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"model": "claude-haiku-4-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_02",
            "usage": {"input_tokens": 12, "output_tokens": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), None).await;
    // 3.6M of the 5M default ceiling = 72%, above the 70% downshift line.
    seed_window_tokens(&h.ledger, 3_600_000).await;

    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
        })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let logs = h.ledger.get_session_logs().await.expect("logs");
    let log = logs
        .iter()
        .find(|log| log.model == "claude-haiku-4-5")
        .expect("routed log present");
    assert_eq!(log.routed_from, Some("claude-sonnet-4-5".to_string()));
    assert!(log.routing_reason.is_some());

    let savings = h.ledger.get_routing_savings(Timeframe::Session).await.expect("savings");
    assert!(savings > 0.0);
}

#[tokio::test]
async fn quota_rejection_teaches_limit_and_arms_fallback() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": {"type": "rate_limit_exceeded", "message": "quota exhausted"}
        })))
        .mount(&primary)
        .await;

    let openrouter = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-1",
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .expect(1)
        .mount(&openrouter)
        .await;

    let h = harness(&primary.uri(), Some(&openrouter.uri())).await;
    seed_window_tokens(&h.ledger, 4_000_000).await;

    let rejected = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
        })))
        .await
        .expect("response");
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = serde_json::from_slice(&body_bytes(rejected).await).expect("json");
    assert_eq!(body["error"]["type"], json!("rate_limit_exceeded"));

    // One event, learned ceiling scaled down from the observed window sum.
    let history =
        h.ledger.get_rate_limit_history("claude-sonnet-4-5").await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].tokens_used_before_limit, 4_000_000);
    let learned = h.learner.get_learned_limit("claude-sonnet-4-5");
    assert_eq!(learned.token_limit, 3_800_000);
    assert!(h.router.is_rate_limited());

    // Next request must leave the primary alone.
    let rerouted = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi again"}],
            "max_tokens": 16,
        })))
        .await
        .expect("response");
    assert_eq!(rerouted.status(), StatusCode::OK);

    let logs = h.ledger.get_session_logs().await.expect("logs");
    let rerouted_log = logs
        .iter()
        .find(|log| log.provider == "openrouter")
        .expect("fallback log present");
    assert_eq!(rerouted_log.model, "anthropic/claude-3.5-haiku");
}

#[tokio::test]
async fn streaming_passes_bytes_and_extracts_usage() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":11}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), None).await;
    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
            "stream": true,
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    assert_eq!(bytes, sse_body.as_bytes());

    // Draining the body above also completed the deferred ledger write.
    let logs = h.ledger.get_session_logs().await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].input_tokens, 7);
    assert_eq!(logs[0].output_tokens, 11);
    assert!(logs[0].success);
}

#[tokio::test]
async fn openai_fallback_flattens_messages() {
    let primary = MockServer::start().await;
    let openrouter = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "anthropic/claude-3.5-haiku",
            "messages": [
                {"role": "system", "content": "S"},
                {"role": "user", "content": "a\nb"},
            ],
            "max_tokens": 64,
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-2",
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .expect(1)
        .mount(&openrouter)
        .await;

    let h = harness(&primary.uri(), Some(&openrouter.uri())).await;
    // 4.35M of 5M = 87%: above the provider-switch line, below local.
    seed_window_tokens(&h.ledger, 4_352_000).await;

    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "system": "S",
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            }],
            "max_tokens": 64,
        })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let logs = h.ledger.get_session_logs().await.expect("logs");
    let routed_log = logs
        .iter()
        .find(|log| log.provider == "openrouter")
        .expect("openrouter log present");
    assert_eq!(routed_log.routed_from, Some("claude-sonnet-4-5".to_string()));
}

#[tokio::test]
async fn missing_credential_is_rejected_without_ledger_row() {
    let server = MockServer::start().await;
    let h = harness(&server.uri(), None).await;
    // Strip the configured key so neither header nor config supplies one.
    h.router
        .update_provider(ProviderConfig {
            name: PRIMARY_PROVIDER.to_string(),
            kind: ProviderKind::Primary,
            endpoint: server.uri(),
            api_key: None,
            models: vec!["claude-sonnet-4-5".to_string(), "claude-haiku-4-5".to_string()],
            enabled: true,
            priority: 0,
        })
        .await;

    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(h.ledger.get_session_logs().await.expect("logs").is_empty());
}

#[tokio::test]
async fn upstream_error_passes_through_with_failed_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "type": "error",
            "error": {"type": "api_error", "message": "overloaded"}
        })))
        .mount(&server)
        .await;

    let h = harness(&server.uri(), None).await;
    let response = h
        .app
        .clone()
        .oneshot(messages_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let logs = h.ledger.get_session_logs().await.expect("logs");
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].error_type, Some("api_error".to_string()));
}

#[tokio::test]
async fn passthrough_forwards_other_v1_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "claude-sonnet-4-5"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server.uri(), None).await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/models")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).expect("json");
    assert_eq!(body["data"][0]["id"], json!("claude-sonnet-4-5"));
}

#[tokio::test]
async fn health_and_stats_endpoints_respond() {
    let server = MockServer::start().await;
    let h = harness(&server.uri(), None).await;

    let health = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(health).await).expect("json");
    assert_eq!(body["status"], json!("ok"));
    assert!(body["version"].is_string());

    let stats = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(stats.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(stats).await).expect("json");
    // No velocity yet: time to exhaustion reports the unbounded sentinel.
    assert_eq!(body["prediction"]["minutes_until_limit"], json!(999.0));
    assert_eq!(body["session"]["requests"], json!(0));
    assert_eq!(body["router"]["is_rate_limited"], json!(false));
    assert_eq!(body["usage"]["saved_by_routing"], json!(0.0));
}
