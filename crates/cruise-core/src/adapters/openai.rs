//! OpenAI-compatible (`/chat/completions`) adapter.

use cruise_types::ProxyError;
use serde_json::{json, Value};

use super::{flattened_messages, transport_err, ParsedRequest};

const REFERER_HEADER: &str = "https://github.com/cruise-proxy/cruise";
const TITLE_HEADER: &str = "cruise";

/// Translate a Messages request into the chat-completions schema.
pub fn build_chat_body(body: &Value, model: &str) -> Value {
    let mut out = json!({
        "model": model,
        "messages": flattened_messages(body),
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    });
    if let Some(max_tokens) = body.get("max_tokens") {
        out["max_tokens"] = max_tokens.clone();
    }
    out
}

/// Forward to an OpenAI-compatible provider with Bearer auth.
pub async fn forward_chat_completions(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    request: &ParsedRequest,
    model: &str,
) -> Result<reqwest::Response, ProxyError> {
    let body = build_chat_body(&request.body, model);

    client
        .post(format!("{endpoint}/chat/completions"))
        .bearer_auth(api_key)
        .header("HTTP-Referer", REFERER_HEADER)
        .header("X-Title", TITLE_HEADER)
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| transport_err("openrouter", &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_system_and_parts() {
        let body = json!({
            "model": "claude-sonnet-4-5",
            "system": "S",
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            }],
            "max_tokens": 32,
            "stream": true,
        });

        let out = build_chat_body(&body, "anthropic/claude-3.5-haiku");
        assert_eq!(
            out,
            json!({
                "model": "anthropic/claude-3.5-haiku",
                "messages": [
                    {"role": "system", "content": "S"},
                    {"role": "user", "content": "a\nb"},
                ],
                "max_tokens": 32,
                "stream": true,
            })
        );
    }

    #[test]
    fn omits_max_tokens_when_absent() {
        let body = json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "U"}],
        });
        let out = build_chat_body(&body, "anthropic/claude-3.5-sonnet");
        assert!(out.get("max_tokens").is_none());
        assert_eq!(out["stream"], json!(false));
    }
}
