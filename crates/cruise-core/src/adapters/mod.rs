//! Provider adapters: translate the native Messages request into each
//! upstream's schema and forward it.
//!
//! The primary adapter forwards the body untouched apart from the routed
//! model. The OpenAI-compatible and local-chat adapters flatten structured
//! message content into plain strings and hoist the top-level `system`
//! field into a leading system message.

mod anthropic;
mod local;
mod openai;

pub use anthropic::forward_messages;
pub use local::{build_local_body, forward_local_chat};
pub use openai::{build_chat_body, forward_chat_completions};

use cruise_types::{ProviderKind, ProxyError};
use serde_json::Value;

use crate::router::RouteTarget;

/// The client request after one parse, kept as raw JSON so the primary
/// path can forward it byte-for-byte (model aside).
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub body: Value,
    pub model: String,
    pub stream: bool,
}

impl ParsedRequest {
    pub fn from_body(body: Value) -> Result<Self, ProxyError> {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::InvalidRequest {
                message: "request body is missing `model`".to_string(),
            })?
            .to_string();
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self { body, model, stream })
    }
}

/// Forward one request to the routed target, translating the schema as the
/// target's kind requires.
pub async fn dispatch(
    client: &reqwest::Client,
    target: &RouteTarget,
    request: &ParsedRequest,
    api_key: Option<&str>,
    beta_header: Option<&str>,
) -> Result<reqwest::Response, ProxyError> {
    match target.kind {
        ProviderKind::Primary => {
            let key = api_key.ok_or_else(|| ProxyError::MissingCredential {
                provider: target.provider.clone(),
            })?;
            forward_messages(client, &target.endpoint, key, beta_header, request, &target.model)
                .await
        }
        ProviderKind::OpenAiCompatible => {
            let key = target.api_key.as_deref().ok_or_else(|| {
                ProxyError::MissingCredential { provider: target.provider.clone() }
            })?;
            forward_chat_completions(client, &target.endpoint, key, request, &target.model).await
        }
        ProviderKind::LocalChat => {
            forward_local_chat(client, &target.endpoint, request, &target.model).await
        }
    }
}

/// Flatten Messages-style content into a single string.
///
/// Arrays of parts are reduced to their `text` fields joined with newlines;
/// strings pass through; anything else is serialized as-is.
pub(crate) fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Build the flattened message list shared by the OpenAI-compatible and
/// local-chat schemas: `system` first (when present), then each message
/// with its content flattened.
pub(crate) fn flattened_messages(body: &Value) -> Vec<Value> {
    let mut messages = Vec::new();

    if let Some(system) = body.get("system") {
        messages.push(serde_json::json!({
            "role": "system",
            "content": flatten_content(system),
        }));
    }

    if let Some(input) = body.get("messages").and_then(Value::as_array) {
        for message in input {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let content =
                message.get("content").map(flatten_content).unwrap_or_default();
            messages.push(serde_json::json!({ "role": role, "content": content }));
        }
    }

    messages
}

pub(crate) fn transport_err(provider: &str, err: &reqwest::Error) -> ProxyError {
    ProxyError::UpstreamUnavailable { provider: provider.to_string(), message: err.to_string() }
}
