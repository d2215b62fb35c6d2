use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which registered provider to drive the agent loop with.
    #[serde(default = "d_provider")]
    pub provider: String,

    /// Default model name when a mission has no `model_override`.
    #[serde(default = "d_default_model")]
    pub default_model: String,

    /// Per-model pricing used to estimate cost when the provider does not
    /// report an actual charge. Key = model name.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            default_model: d_default_model(),
            pricing: HashMap::new(),
        }
    }
}

/// Cents per 1K tokens, split by direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cents_per_1k: f64,
    pub output_cents_per_1k: f64,
}

impl ModelPricing {
    /// Estimated cost in whole cents, rounded up so estimates never read
    /// as free.
    pub fn estimate_cents(&self, usage: &Usage) -> i64 {
        let cents = (usage.prompt_tokens as f64 / 1000.0) * self.input_cents_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.output_cents_per_1k;
        cents.ceil() as i64
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider() -> String {
    "scripted".into()
}
fn d_default_model() -> String {
    "scripted-1".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        let pricing = ModelPricing {
            input_cents_per_1k: 0.3,
            output_cents_per_1k: 1.5,
        };
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 100,
            total_tokens: 1100,
        };
        // 0.3 + 0.15 = 0.45 -> 1 cent
        assert_eq!(pricing.estimate_cents(&usage), 1);
    }

    #[test]
    fn zero_usage_costs_nothing() {
        let pricing = ModelPricing {
            input_cents_per_1k: 0.3,
            output_cents_per_1k: 1.5,
        };
        assert_eq!(pricing.estimate_cents(&Usage::default()), 0);
    }
}
