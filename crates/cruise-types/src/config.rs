//! Router and provider configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name tag of the primary (native-schema) provider.
pub const PRIMARY_PROVIDER: &str = "anthropic";

/// Default model identifiers on the primary provider.
pub const DEFAULT_SONNET_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_HAIKU_MODEL: &str = "claude-haiku-4-5";

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";
const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// How aggressively the router may act.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RouterMode {
    /// Never reroute, only observe
    Manual,
    /// Reroute within the primary provider and to fallbacks on rate limit
    #[default]
    SemiAuto,
    /// Full threshold cascade including alternate providers
    FullAuto,
}

impl fmt::Display for RouterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterMode::Manual => write!(f, "manual"),
            RouterMode::SemiAuto => write!(f, "semi-auto"),
            RouterMode::FullAuto => write!(f, "full-auto"),
        }
    }
}

impl RouterMode {
    pub fn from_string(s: &str) -> Self {
        match s {
            "manual" => RouterMode::Manual,
            "full-auto" => RouterMode::FullAuto,
            _ => RouterMode::SemiAuto,
        }
    }
}

/// Which request schema a provider speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Native Messages schema, `x-api-key` auth
    Primary,
    /// `/chat/completions`, Bearer auth
    OpenAiCompatible,
    /// `/api/chat`, no auth
    LocalChat,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Primary => write!(f, "primary"),
            ProviderKind::OpenAiCompatible => write!(f, "openai-compatible"),
            ProviderKind::LocalChat => write!(f, "local-chat"),
        }
    }
}

/// One upstream target the router may select.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Preferred models, cheapest-first for non-primary providers
    pub models: Vec<String>,
    pub enabled: bool,
    /// Lower is tried earlier during rate-limit fallback
    pub priority: u8,
}

impl ProviderConfig {
    /// The model used when failing over to this provider.
    pub fn fallback_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    /// Haiku-class model on this provider, for in-provider downshifts.
    pub fn cheap_model(&self) -> &str {
        self.models
            .iter()
            .find(|m| m.to_lowercase().contains("haiku"))
            .map_or(DEFAULT_HAIKU_MODEL, String::as_str)
    }
}

/// Usage-percent thresholds for the routing cascade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouterThresholds {
    /// At or above this, downshift to the cheap model on the primary
    pub switch_to_haiku: f64,
    /// At or above this, route to an OpenAI-compatible provider
    pub switch_to_openrouter: f64,
    /// At or above this, route to a local-chat provider
    pub switch_to_local: f64,
}

impl Default for RouterThresholds {
    fn default() -> Self {
        Self { switch_to_haiku: 70.0, switch_to_openrouter: 85.0, switch_to_local: 95.0 }
    }
}

/// Full router configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    pub mode: RouterMode,
    pub enabled: bool,
    pub thresholds: RouterThresholds,
    pub providers: Vec<ProviderConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            enabled: true,
            thresholds: RouterThresholds::default(),
            providers: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Build the provider list from the process environment.
    ///
    /// `ANTHROPIC_API_KEY` configures the primary; `OPENROUTER_API_KEY`
    /// enables the OpenAI-compatible fallback; `OLLAMA_ENABLED` (with
    /// optional `OLLAMA_ENDPOINT`) enables the local-chat provider.
    pub fn from_env() -> Self {
        let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        let openrouter_key = std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty());
        let ollama_enabled = std::env::var("OLLAMA_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let ollama_endpoint = std::env::var("OLLAMA_ENDPOINT")
            .ok()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| OLLAMA_DEFAULT_ENDPOINT.to_string());

        let mut providers = vec![ProviderConfig {
            name: PRIMARY_PROVIDER.to_string(),
            kind: ProviderKind::Primary,
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
            api_key: anthropic_key,
            models: vec![DEFAULT_SONNET_MODEL.to_string(), DEFAULT_HAIKU_MODEL.to_string()],
            enabled: true,
            priority: 0,
        }];

        providers.push(ProviderConfig {
            name: "openrouter".to_string(),
            kind: ProviderKind::OpenAiCompatible,
            endpoint: OPENROUTER_ENDPOINT.to_string(),
            api_key: openrouter_key.clone(),
            models: vec![
                "anthropic/claude-3.5-sonnet".to_string(),
                "anthropic/claude-3.5-haiku".to_string(),
            ],
            enabled: openrouter_key.is_some(),
            priority: 1,
        });

        providers.push(ProviderConfig {
            name: "ollama".to_string(),
            kind: ProviderKind::LocalChat,
            endpoint: ollama_endpoint,
            api_key: None,
            models: vec!["llama3.2".to_string()],
            enabled: ollama_enabled,
            priority: 2,
        });

        Self { providers, ..Self::default() }
    }

    /// The primary provider entry, if configured.
    pub fn primary(&self) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind == ProviderKind::Primary)
    }

    /// First enabled provider of the given kind.
    pub fn enabled_provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind == kind && p.enabled)
    }
}

/// Dashboard view of one provider (no secrets).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub has_api_key: bool,
}

/// Dashboard view of the router.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterStatus {
    pub mode: RouterMode,
    pub enabled: bool,
    pub current_model: Option<String>,
    pub is_rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_time: Option<i64>,
    pub providers: Vec<ProviderStatus>,
}
