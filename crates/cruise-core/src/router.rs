//! Request router: threshold cascade plus sticky rate-limit fallback.
//!
//! The router holds the only process-wide mutable configuration. Handlers
//! read through snapshots; mutation goes through the `set_*` methods. The
//! rate-limited flag is armed by the meter on an upstream 429 and cleared
//! by a background timer.

use cruise_types::models::Prediction;
use cruise_types::{
    pricing, ProviderConfig, ProviderKind, ProviderStatus, RouterConfig, RouterMode, RouterStatus,
    PRIMARY_PROVIDER,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::now_ms;

/// Minimum time the rate-limited flag stays set once armed.
const MIN_RATE_LIMIT_HOLD_MS: i64 = 60_000;

/// Hold applied when the upstream gave no reset time (the provider's
/// rolling window length).
const DEFAULT_RATE_LIMIT_HOLD_MS: i64 = 5 * 3_600_000;

/// Where the next request should go.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub provider: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub reason: String,
    pub estimated_savings: f64,
    /// True iff the target model differs from the requested model or the
    /// target provider is not the primary.
    pub should_route: bool,
}

pub struct RequestRouter {
    config: RwLock<RouterConfig>,
    rate_limited: AtomicBool,
    rate_limit_reset: RwLock<Option<i64>>,
    last_routed_model: RwLock<Option<String>>,
}

impl RequestRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config: RwLock::new(config),
            rate_limited: AtomicBool::new(false),
            rate_limit_reset: RwLock::new(None),
            last_routed_model: RwLock::new(None),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Arm the sticky rate-limited flag and schedule its clearing after the
    /// upstream reset time (held at least one minute), or after the default
    /// rolling window when no reset time is known. The schedule is not
    /// persisted; a restart starts clear and the next 429 re-arms it.
    pub fn record_rate_limit(self: Arc<Self>, reset_time: Option<i64>) {
        let now = now_ms();
        let hold_ms = reset_time
            .map(|reset| (reset - now).max(MIN_RATE_LIMIT_HOLD_MS))
            .unwrap_or(DEFAULT_RATE_LIMIT_HOLD_MS);
        let reset_at = now + hold_ms;

        self.rate_limited.store(true, Ordering::Relaxed);

        let router = self;
        tokio::spawn(async move {
            *router.rate_limit_reset.write().await = Some(reset_at);
            tracing::warn!(
                "Primary rate limited; redirecting traffic for {}s",
                hold_ms / 1000
            );
            tokio::time::sleep(std::time::Duration::from_millis(hold_ms as u64)).await;
            router.rate_limited.store(false, Ordering::Relaxed);
            *router.rate_limit_reset.write().await = None;
            tracing::info!("Rate limit hold expired; primary eligible again");
        });
    }

    /// Select the target provider and model for one request.
    pub async fn route(&self, requested_model: &str, prediction: &Prediction) -> RouteTarget {
        let config = self.config.read().await;
        let target = self.select(&config, requested_model, prediction);
        drop(config);

        *self.last_routed_model.write().await = Some(target.model.clone());
        target
    }

    fn select(
        &self,
        config: &RouterConfig,
        requested_model: &str,
        prediction: &Prediction,
    ) -> RouteTarget {
        let no_route = |reason: &str| {
            let primary = config.primary();
            RouteTarget {
                provider: PRIMARY_PROVIDER.to_string(),
                kind: ProviderKind::Primary,
                endpoint: primary.map(|p| p.endpoint.clone()).unwrap_or_default(),
                api_key: primary.and_then(|p| p.api_key.clone()),
                model: requested_model.to_string(),
                reason: reason.to_string(),
                estimated_savings: 0.0,
                should_route: false,
            }
        };

        if !config.enabled || config.mode == RouterMode::Manual {
            return no_route("routing disabled");
        }

        if self.is_rate_limited() {
            let mut fallbacks: Vec<&ProviderConfig> = config
                .providers
                .iter()
                .filter(|p| p.enabled && p.kind != ProviderKind::Primary)
                .collect();
            fallbacks.sort_by_key(|p| p.priority);

            if let Some(provider) = fallbacks.first() {
                if let Some(model) = provider.fallback_model() {
                    return self.target_for(
                        provider,
                        requested_model,
                        model,
                        format!("primary rate limited, failing over to {}", provider.name),
                    );
                }
            }
            return no_route("primary rate limited but no fallback provider enabled");
        }

        let usage = prediction.usage_percent;
        let thresholds = &config.thresholds;

        if usage >= thresholds.switch_to_local {
            if let Some(provider) = config.enabled_provider(ProviderKind::LocalChat) {
                if let Some(model) = provider.fallback_model() {
                    return self.target_for(
                        provider,
                        requested_model,
                        model,
                        format!("usage at {usage:.0}%, routing to local model"),
                    );
                }
            }
        }

        if usage >= thresholds.switch_to_openrouter {
            if let Some(provider) = config.enabled_provider(ProviderKind::OpenAiCompatible) {
                if let Some(model) = provider.fallback_model() {
                    return self.target_for(
                        provider,
                        requested_model,
                        model,
                        format!("usage at {usage:.0}%, routing to {}", provider.name),
                    );
                }
            }
        }

        if usage >= thresholds.switch_to_haiku {
            if let Some(provider) = config.enabled_provider(ProviderKind::Primary) {
                let model = provider.cheap_model().to_string();
                return self.target_for(
                    provider,
                    requested_model,
                    &model,
                    format!("usage at {usage:.0}%, downshifting to {model}"),
                );
            }
        }

        no_route("within budget")
    }

    fn target_for(
        &self,
        provider: &ProviderConfig,
        requested_model: &str,
        model: &str,
        reason: String,
    ) -> RouteTarget {
        // Explicit disjunction: same-model routes on the primary are not
        // reported as switches.
        let should_route = model != requested_model || provider.name != PRIMARY_PROVIDER;
        RouteTarget {
            provider: provider.name.clone(),
            kind: provider.kind,
            endpoint: provider.endpoint.clone(),
            api_key: provider.api_key.clone(),
            model: model.to_string(),
            reason,
            estimated_savings: if should_route {
                pricing::estimate_savings(requested_model, model)
            } else {
                0.0
            },
            should_route,
        }
    }

    /// Snapshot of the primary provider entry, for the pass-through
    /// forwarder and credential checks.
    pub async fn primary_provider(&self) -> Option<ProviderConfig> {
        self.config.read().await.primary().cloned()
    }

    pub async fn set_mode(&self, mode: RouterMode) {
        self.config.write().await.mode = mode;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.config.write().await.enabled = enabled;
    }

    /// Replace (or append) one provider entry by name.
    pub async fn update_provider(&self, provider: ProviderConfig) {
        let mut config = self.config.write().await;
        match config.providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => *existing = provider,
            None => config.providers.push(provider),
        }
    }

    /// Dashboard view. Never exposes api keys.
    pub async fn get_status(&self) -> RouterStatus {
        let config = self.config.read().await;
        RouterStatus {
            mode: config.mode,
            enabled: config.enabled,
            current_model: self.last_routed_model.read().await.clone(),
            is_rate_limited: self.is_rate_limited(),
            rate_limit_reset_time: *self.rate_limit_reset.read().await,
            providers: config
                .providers
                .iter()
                .map(|p| ProviderStatus {
                    name: p.name.clone(),
                    enabled: p.enabled,
                    has_api_key: p.api_key.is_some(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cruise_types::RouterThresholds;

    fn test_config() -> RouterConfig {
        RouterConfig {
            mode: RouterMode::FullAuto,
            enabled: true,
            thresholds: RouterThresholds::default(),
            providers: vec![
                ProviderConfig {
                    name: PRIMARY_PROVIDER.to_string(),
                    kind: ProviderKind::Primary,
                    endpoint: "https://api.anthropic.com".to_string(),
                    api_key: Some("sk-test".to_string()),
                    models: vec![
                        "claude-sonnet-4-5".to_string(),
                        "claude-haiku-4-5".to_string(),
                    ],
                    enabled: true,
                    priority: 0,
                },
                ProviderConfig {
                    name: "openrouter".to_string(),
                    kind: ProviderKind::OpenAiCompatible,
                    endpoint: "https://openrouter.ai/api/v1".to_string(),
                    api_key: Some("or-test".to_string()),
                    models: vec!["anthropic/claude-3.5-haiku".to_string()],
                    enabled: true,
                    priority: 1,
                },
                ProviderConfig {
                    name: "ollama".to_string(),
                    kind: ProviderKind::LocalChat,
                    endpoint: "http://localhost:11434".to_string(),
                    api_key: None,
                    models: vec!["llama3.2".to_string()],
                    enabled: true,
                    priority: 2,
                },
            ],
        }
    }

    fn prediction_at(usage_percent: f64) -> Prediction {
        Prediction { usage_percent, ..Prediction::default() }
    }

    #[tokio::test]
    async fn under_threshold_stays_on_requested_model() {
        let router = RequestRouter::new(test_config());
        let target = router.route("claude-sonnet-4-5", &prediction_at(30.0)).await;
        assert!(!target.should_route);
        assert_eq!(target.provider, PRIMARY_PROVIDER);
        assert_eq!(target.model, "claude-sonnet-4-5");
        assert_eq!(target.estimated_savings, 0.0);
    }

    #[tokio::test]
    async fn cascade_steps_through_thresholds() {
        let router = RequestRouter::new(test_config());

        let haiku = router.route("claude-sonnet-4-5", &prediction_at(72.0)).await;
        assert!(haiku.should_route);
        assert_eq!(haiku.provider, PRIMARY_PROVIDER);
        assert_eq!(haiku.model, "claude-haiku-4-5");
        assert!(haiku.estimated_savings > 0.0);

        let openrouter = router.route("claude-sonnet-4-5", &prediction_at(87.0)).await;
        assert_eq!(openrouter.provider, "openrouter");
        assert_eq!(openrouter.model, "anthropic/claude-3.5-haiku");

        let local = router.route("claude-sonnet-4-5", &prediction_at(96.0)).await;
        assert_eq!(local.provider, "ollama");
        assert_eq!(local.kind, ProviderKind::LocalChat);
        assert_eq!(local.model, "llama3.2");
    }

    #[tokio::test]
    async fn manual_mode_never_routes() {
        let router = RequestRouter::new(RouterConfig { mode: RouterMode::Manual, ..test_config() });
        let target = router.route("claude-sonnet-4-5", &prediction_at(99.0)).await;
        assert!(!target.should_route);
        assert_eq!(target.model, "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn disabled_cascade_falls_back_to_primary_downshift() {
        let mut config = test_config();
        for provider in &mut config.providers {
            if provider.kind != ProviderKind::Primary {
                provider.enabled = false;
            }
        }
        let router = RequestRouter::new(config);
        let target = router.route("claude-sonnet-4-5", &prediction_at(96.0)).await;
        assert_eq!(target.provider, PRIMARY_PROVIDER);
        assert_eq!(target.model, "claude-haiku-4-5");
    }

    #[tokio::test]
    async fn rate_limited_skips_primary() {
        let router = Arc::new(RequestRouter::new(test_config()));
        router.clone().record_rate_limit(None);
        // The spawned reset task holds the flag; routing sees it immediately.
        assert!(router.is_rate_limited());

        let target = router.route("claude-sonnet-4-5", &prediction_at(10.0)).await;
        assert!(target.should_route);
        assert_ne!(target.provider, PRIMARY_PROVIDER);
        assert_eq!(target.provider, "openrouter");
    }

    #[tokio::test]
    async fn rate_limited_without_fallback_stays_put() {
        let mut config = test_config();
        for provider in &mut config.providers {
            if provider.kind != ProviderKind::Primary {
                provider.enabled = false;
            }
        }
        let router = Arc::new(RequestRouter::new(config));
        router.clone().record_rate_limit(None);

        let target = router.route("claude-sonnet-4-5", &prediction_at(10.0)).await;
        assert!(!target.should_route);
        assert_eq!(target.provider, PRIMARY_PROVIDER);
    }

    #[tokio::test]
    async fn same_model_primary_route_is_not_a_switch() {
        let router = RequestRouter::new(test_config());
        let target = router.route("claude-haiku-4-5", &prediction_at(72.0)).await;
        // Downshift target equals the requested model: nothing to log.
        assert!(!target.should_route);
        assert_eq!(target.estimated_savings, 0.0);
    }

    #[tokio::test]
    async fn status_hides_secrets() {
        let router = RequestRouter::new(test_config());
        let status = router.get_status().await;
        assert_eq!(status.providers.len(), 3);
        assert!(status.providers[0].has_api_key);
        assert!(!status.providers[2].has_api_key);
        assert!(!status.is_rate_limited);
    }
}
