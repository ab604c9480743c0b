//! Cost calculation for LLM providers and models.
//!
//! Pricing is a two-level table: provider -> model -> per-million-token
//! rates. Built-in entries are seeded at construction; custom entries can be
//! registered at runtime and overwrite on collision. Unknown providers and
//! models cost nothing: this fails open for cost display, it is not a
//! billing system.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per one million input tokens
    pub input_per_million: f64,
    /// USD per one million output tokens
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Create a pricing entry
    #[must_use]
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input + output
    }
}

// USD per 1M tokens, as of Jan 2025.
const BUILTIN_PRICING: &[(&str, &str, f64, f64)] = &[
    ("openai", "gpt-4-turbo", 10.0, 30.0),
    ("openai", "gpt-4", 30.0, 60.0),
    ("openai", "gpt-3.5-turbo", 0.5, 1.5),
    ("openai", "text-embedding-3-small", 0.02, 0.0),
    ("openai", "text-embedding-3-large", 0.13, 0.0),
    ("openai", "text-embedding-ada-002", 0.10, 0.0),
    ("anthropic", "claude-3-opus-20240229", 15.0, 75.0),
    ("anthropic", "claude-3-sonnet-20240229", 3.0, 15.0),
    ("anthropic", "claude-3-haiku-20240307", 0.25, 1.25),
    ("anthropic", "claude-3-5-sonnet-20241022", 3.0, 15.0),
    ("cohere", "command-r-plus", 3.0, 15.0),
    ("cohere", "command-r", 0.5, 1.5),
    ("cohere", "embed-english-v3.0", 0.10, 0.0),
    ("cohere", "rerank-english-v3.0", 2.0, 0.0),
    ("together", "meta-llama/llama-3-70b", 0.9, 0.9),
    ("together", "meta-llama/llama-3-8b", 0.2, 0.2),
    ("together", "mistralai/mixtral-8x7b-instruct-v0.1", 0.6, 0.6),
];

type PricingTable = HashMap<String, HashMap<String, ModelPricing>>;

/// Calculates USD cost from token counts using a runtime-extensible
/// pricing table.
#[derive(Debug)]
pub struct CostCalculator {
    pricing: RwLock<PricingTable>,
}

impl CostCalculator {
    /// Create a calculator seeded with the built-in pricing table.
    #[must_use]
    pub fn new() -> Self {
        let mut pricing: PricingTable = HashMap::new();
        for &(provider, model, input, output) in BUILTIN_PRICING {
            pricing
                .entry(provider.to_string())
                .or_default()
                .insert(model.to_string(), ModelPricing::new(input, output));
        }
        Self {
            pricing: RwLock::new(pricing),
        }
    }

    /// Create a calculator with no built-in pricing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            pricing: RwLock::new(HashMap::new()),
        }
    }

    /// Calculate the cost of a request in USD.
    ///
    /// Provider lookup is case-insensitive; model lookup trims and
    /// lower-cases, tries an exact match, then falls back to substring
    /// matching so versioned identifiers like `gpt-4-0613` resolve to their
    /// base entry. When several keys substring-match, the longest key wins
    /// (ties break lexicographically), which keeps the fallback
    /// deterministic. Anything still unmatched costs 0.
    #[must_use]
    pub fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let provider = provider.to_lowercase();
        let model = normalize_model_name(model);

        let pricing = self.pricing.read();
        let Some(models) = pricing.get(&provider) else {
            return 0.0;
        };

        let entry = models
            .get(&model)
            .copied()
            .or_else(|| substring_fallback(models, &model));
        let Some(entry) = entry else {
            return 0.0;
        };

        round8(entry.cost(input_tokens, output_tokens))
    }

    /// Register or overwrite pricing for one model. Creates the provider's
    /// table if absent. There is no removal operation.
    pub fn add_custom_pricing(
        &self,
        provider: &str,
        model: &str,
        input_per_million: f64,
        output_per_million: f64,
    ) {
        let mut pricing = self.pricing.write();
        pricing
            .entry(provider.to_lowercase())
            .or_default()
            .insert(
                normalize_model_name(model),
                ModelPricing::new(input_per_million, output_per_million),
            );
    }

    /// Look up the effective pricing entry for a model, if any.
    #[must_use]
    pub fn get_pricing(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        let provider = provider.to_lowercase();
        let model = normalize_model_name(model);
        let pricing = self.pricing.read();
        let models = pricing.get(&provider)?;
        models
            .get(&model)
            .copied()
            .or_else(|| substring_fallback(models, &model))
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_model_name(model: &str) -> String {
    model.trim().to_lowercase()
}

fn substring_fallback(
    models: &HashMap<String, ModelPricing>,
    model: &str,
) -> Option<ModelPricing> {
    let mut best: Option<(&str, ModelPricing)> = None;
    for (key, pricing) in models {
        if !(key.contains(model) || model.contains(key.as_str())) {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_key, _)) => {
                key.len() > best_key.len()
                    || (key.len() == best_key.len() && key.as_str() < best_key)
            }
        };
        if better {
            best = Some((key, *pricing));
        }
    }
    best.map(|(_, pricing)| pricing)
}

fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

static GLOBAL_CALCULATOR: Lazy<Arc<CostCalculator>> =
    Lazy::new(|| Arc::new(CostCalculator::new()));

/// Process-wide cost calculator. Instrumentors that need isolation (tests,
/// per-tenant overrides) construct their own [`CostCalculator`].
#[must_use]
pub fn global_calculator() -> Arc<CostCalculator> {
    Arc::clone(&GLOBAL_CALCULATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_cost() {
        let calc = CostCalculator::new();
        let cost = calc.calculate_cost("openai", "gpt-4-turbo", 1000, 500);
        assert!((cost - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_provider_costs_nothing() {
        let calc = CostCalculator::new();
        assert_eq!(calc.calculate_cost("nobody", "gpt-4", 1000, 1000), 0.0);
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        let calc = CostCalculator::new();
        assert_eq!(calc.calculate_cost("openai", "unknown-model", 100, 0), 0.0);
    }

    #[test]
    fn test_case_and_whitespace_normalization() {
        let calc = CostCalculator::new();
        let cost = calc.calculate_cost("OpenAI", "  GPT-4-Turbo  ", 1000, 500);
        assert!((cost - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_versioned_model_falls_back_to_base_entry() {
        let calc = CostCalculator::new();
        let base = calc.calculate_cost("openai", "gpt-4", 1000, 0);
        let versioned = calc.calculate_cost("openai", "gpt-4-0613", 1000, 0);
        assert!((versioned - base).abs() < 1e-12);
        assert!(versioned > 0.0);
    }

    #[test]
    fn test_fallback_prefers_longest_matching_key() {
        let calc = CostCalculator::new();
        // Both "gpt-4" and "gpt-4-turbo" are substrings of this name; the
        // longer key must win.
        let cost = calc.calculate_cost("openai", "gpt-4-turbo-2024-04-09", 1_000_000, 0);
        assert!((cost - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_scale_precision() {
        let calc = CostCalculator::new();
        // 50 tokens of text-embedding-3-small: 50/1e6 * 0.02 = 1e-6
        let cost = calc.calculate_cost("openai", "text-embedding-3-small", 50, 0);
        assert!((cost - 0.000_001).abs() < 1e-12);
    }

    #[test]
    fn test_custom_pricing_overrides_fallback() {
        let calc = CostCalculator::new();
        calc.add_custom_pricing("openai", "gpt-4-0613", 5.0, 10.0);

        // Exact custom entry beats the "gpt-4" substring fallback
        let cost = calc.calculate_cost("openai", "gpt-4-0613", 1_000_000, 0);
        assert!((cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_pricing_new_provider() {
        let calc = CostCalculator::new();
        calc.add_custom_pricing("acme", "house-model", 1.0, 2.0);

        let cost = calc.calculate_cost("acme", "house-model", 500_000, 500_000);
        assert!((cost - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_cost_is_deterministic_and_non_negative() {
        let calc = CostCalculator::new();
        for _ in 0..3 {
            let cost = calc.calculate_cost("anthropic", "claude-3-haiku-20240307", 123, 456);
            assert!(cost >= 0.0);
            assert!((cost - calc.calculate_cost("anthropic", "claude-3-haiku-20240307", 123, 456)).abs() < 1e-15);
        }
    }

    #[test]
    fn test_zero_tokens_cost_zero() {
        let calc = CostCalculator::new();
        assert_eq!(calc.calculate_cost("openai", "gpt-4", 0, 0), 0.0);
    }

    #[test]
    fn test_empty_calculator() {
        let calc = CostCalculator::empty();
        assert_eq!(calc.calculate_cost("openai", "gpt-4", 1000, 1000), 0.0);
    }
}
