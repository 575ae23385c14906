//! Token-based cost estimation.
//!
//! Prices are USD per 1 000 tokens. Model identifiers are matched by longest
//! prefix so dated snapshots (`gpt-4o-2024-08-06`) price like their family.
//!
//! Unknown models are priced at [`DEFAULT_PRICING`] (the `gpt-4o` rate), never
//! at zero. Use [`is_known_model`] to warn the operator when that happens.

/// Per-1K-token prices for one model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Rate applied to models missing from [`PRICING_TABLE`].
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(0.0025, 0.01);

/// Static pricing table, keyed by model prefix.
pub const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing::new(0.000_15, 0.000_6)),
    ("gpt-4o", ModelPricing::new(0.0025, 0.01)),
    ("gpt-4.1-nano", ModelPricing::new(0.0001, 0.0004)),
    ("gpt-4.1-mini", ModelPricing::new(0.0004, 0.0016)),
    ("gpt-4.1", ModelPricing::new(0.002, 0.008)),
    ("gpt-4-turbo", ModelPricing::new(0.01, 0.03)),
    ("gpt-4-vision-preview", ModelPricing::new(0.01, 0.03)),
    ("o4-mini", ModelPricing::new(0.0011, 0.0044)),
];

/// Look up the pricing entry for `model`, if it is in the table.
pub fn lookup(model: &str) -> Option<ModelPricing> {
    let model = model.trim().to_ascii_lowercase();
    PRICING_TABLE
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, pricing)| *pricing)
}

/// True when `model` has its own entry in the pricing table.
pub fn is_known_model(model: &str) -> bool {
    lookup(model).is_some()
}

/// Pricing for `model`, falling back to [`DEFAULT_PRICING`].
pub fn pricing_for(model: &str) -> ModelPricing {
    lookup(model).unwrap_or(DEFAULT_PRICING)
}

/// Estimated cost in USD of one request. Full precision, no rounding.
pub fn cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let p = pricing_for(model);
    (input_tokens as f64 / 1000.0) * p.input_per_1k + (output_tokens as f64 / 1000.0) * p.output_per_1k
}
