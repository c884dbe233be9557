//! Local-chat (`/api/chat`) adapter. No auth, same flattening as the
//! OpenAI-compatible path.

use cruise_types::ProxyError;
use serde_json::{json, Value};

use super::{flattened_messages, transport_err, ParsedRequest};

/// Translate a Messages request into the local chat schema.
pub fn build_local_body(body: &Value, model: &str) -> Value {
    json!({
        "model": model,
        "messages": flattened_messages(body),
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Forward to a local-chat provider.
pub async fn forward_local_chat(
    client: &reqwest::Client,
    endpoint: &str,
    request: &ParsedRequest,
    model: &str,
) -> Result<reqwest::Response, ProxyError> {
    let body = build_local_body(&request.body, model);

    client
        .post(format!("{endpoint}/api/chat"))
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| transport_err("ollama", &e))
}
