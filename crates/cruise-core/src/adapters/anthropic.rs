//! Primary (native Messages schema) adapter.

use cruise_types::ProxyError;
use serde_json::Value;

use super::{transport_err, ParsedRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Forward a Messages request to the primary provider.
///
/// The body is the client's own JSON with only `model` replaced by the
/// routed model; message content is never rewritten on this path.
pub async fn forward_messages(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    beta_header: Option<&str>,
    request: &ParsedRequest,
    model: &str,
) -> Result<reqwest::Response, ProxyError> {
    let mut body = request.body.clone();
    if let Some(object) = body.as_object_mut() {
        object.insert("model".to_string(), Value::String(model.to_string()));
    }

    let mut builder = client
        .post(format!("{endpoint}/v1/messages"))
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json");

    if let Some(beta) = beta_header {
        builder = builder.header("anthropic-beta", beta);
    }

    builder.json(&body).send().await.map_err(|e| transport_err("anthropic", &e))
}
