//! Static model pricing (USD per 1000 tokens)
//!
//! The figures are estimates for admission control, not billing.

use serde::Serialize;

/// Per-1000-token price for a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

const MODEL_PRICING: &[(&str, ModelPrice)] = &[
    ("claude-sonnet-4-20250514", ModelPrice { input: 0.003, output: 0.015 }),
    ("claude-sonnet-4-0", ModelPrice { input: 0.003, output: 0.015 }),
    ("claude-haiku-35", ModelPrice { input: 0.00025, output: 0.00125 }),
    ("claude-haiku-3", ModelPrice { input: 0.00025, output: 0.00125 }),
    ("claude-opus-4-0", ModelPrice { input: 0.015, output: 0.075 }),
];

/// Used for any model missing from the table
pub const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input: 0.003,
    output: 0.015,
};

/// Look up the price tier for a model, falling back to [`DEFAULT_PRICE`]
pub fn price_for(model: &str) -> ModelPrice {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

/// Estimated cost in USD for one call
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let price = price_for(model);
    (input_tokens as f64 / 1000.0) * price.input + (output_tokens as f64 / 1000.0) * price.output
}

/// Whether the model has its own entry in the table
pub fn is_known_model(model: &str) -> bool {
    MODEL_PRICING.iter().any(|(name, _)| *name == model)
}
