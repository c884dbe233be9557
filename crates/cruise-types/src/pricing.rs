//! Static pricing tables and quota ceiling defaults.
//!
//! Prices are USD per million tokens. Cost is a pure function of the
//! effective target model and the token counts; unknown models fall back to
//! Sonnet-class pricing so an unpriced model is never billed as free.

use std::collections::HashMap;
use std::sync::LazyLock;

/// USD per million tokens for one model class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

const SONNET: ModelPricing =
    ModelPricing { input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 };
const HAIKU: ModelPricing =
    ModelPricing { input: 0.8, output: 4.0, cache_read: 0.08, cache_write: 1.0 };
const OPUS: ModelPricing =
    ModelPricing { input: 15.0, output: 75.0, cache_read: 1.5, cache_write: 18.75 };
const LOCAL: ModelPricing =
    ModelPricing { input: 0.0, output: 0.0, cache_read: 0.0, cache_write: 0.0 };
const OPENROUTER_SONNET: ModelPricing =
    ModelPricing { input: 3.5, output: 16.0, cache_read: 0.0, cache_write: 0.0 };
const OPENROUTER_HAIKU: ModelPricing =
    ModelPricing { input: 1.0, output: 5.0, cache_read: 0.0, cache_write: 0.0 };

/// Exact-id entries checked before the class fallback.
static PRICING: LazyLock<HashMap<&'static str, ModelPricing>> = LazyLock::new(|| {
    HashMap::from([
        ("claude-sonnet-4-5", SONNET),
        ("claude-sonnet-4-5-20250929", SONNET),
        ("claude-3-5-sonnet-20241022", SONNET),
        ("claude-haiku-4-5", HAIKU),
        ("claude-3-5-haiku-20241022", HAIKU),
        ("claude-opus-4-5", OPUS),
        ("claude-opus-4-1", OPUS),
        ("anthropic/claude-sonnet-4.5", OPENROUTER_SONNET),
        ("anthropic/claude-3.5-sonnet", OPENROUTER_SONNET),
        ("anthropic/claude-haiku-4.5", OPENROUTER_HAIKU),
        ("anthropic/claude-3.5-haiku", OPENROUTER_HAIKU),
    ])
});

const LOCAL_MODEL_PREFIXES: &[&str] =
    &["llama", "qwen", "mistral", "gemma", "phi", "deepseek", "codellama"];

/// Resolve pricing for an effective target model.
///
/// Exact table entries win; otherwise the model name is classified by
/// substring, and anything unrecognized is priced as Sonnet-class.
pub fn pricing_for(model: &str) -> ModelPricing {
    if let Some(pricing) = PRICING.get(model) {
        return *pricing;
    }

    let lower = model.to_lowercase();

    if LOCAL_MODEL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return LOCAL;
    }
    if lower.starts_with("anthropic/") {
        return if lower.contains("haiku") { OPENROUTER_HAIKU } else { OPENROUTER_SONNET };
    }
    if lower.contains("haiku") {
        return HAIKU;
    }
    if lower.contains("opus") {
        return OPUS;
    }

    SONNET
}

/// Compute the USD cost of one request against the pricing table.
pub fn cost_usd(
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_write_tokens: u64,
) -> f64 {
    let pricing = pricing_for(model);
    (input_tokens as f64 * pricing.input
        + output_tokens as f64 * pricing.output
        + cache_read_tokens as f64 * pricing.cache_read
        + cache_write_tokens as f64 * pricing.cache_write)
        / 1_000_000.0
}

/// Default quota ceilings used until any rate-limit event has been observed.
pub fn default_token_limit(model: &str) -> u64 {
    let lower = model.to_lowercase();
    if lower.contains("haiku") {
        10_000_000
    } else if lower.contains("opus") {
        2_000_000
    } else {
        5_000_000
    }
}

/// Token split of the nominal request used for savings estimates.
const NOMINAL_INPUT_TOKENS: u64 = 5_000;
const NOMINAL_OUTPUT_TOKENS: u64 = 5_000;

/// Estimate USD saved by serving a 10,000-token nominal request on
/// `routed_model` instead of `original_model`. Never negative.
pub fn estimate_savings(original_model: &str, routed_model: &str) -> f64 {
    let original = cost_usd(original_model, NOMINAL_INPUT_TOKENS, NOMINAL_OUTPUT_TOKENS, 0, 0);
    let routed = cost_usd(routed_model, NOMINAL_INPUT_TOKENS, NOMINAL_OUTPUT_TOKENS, 0, 0);
    (original - routed).max(0.0)
}
