// src/services/pricing.rs
// Token pricing for generation cost attribution.
// Prices are in USD per million tokens. Last reviewed: 2026-08.

use tracing::{info, warn};

use crate::generation::GenerationResponse;

pub struct ModelPricing {
    pub input_price: f64,
    pub output_price: f64,
    /// Claude charges a higher tier past 200K context.
    pub input_price_extended: Option<f64>,
    pub output_price_extended: Option<f64>,
}

impl ModelPricing {
    pub fn claude_sonnet_4_5() -> Self {
        Self {
            input_price: 3.00,
            output_price: 15.00,
            input_price_extended: Some(6.00),
            output_price_extended: Some(22.50),
        }
    }

    pub fn claude_haiku_4_5() -> Self {
        Self {
            input_price: 1.00,
            output_price: 5.00,
            input_price_extended: None,
            output_price_extended: None,
        }
    }

    pub fn gemini_2_5_flash() -> Self {
        Self {
            input_price: 0.30,
            output_price: 2.50,
            input_price_extended: None,
            output_price_extended: None,
        }
    }

    fn zero() -> Self {
        Self {
            input_price: 0.0,
            output_price: 0.0,
            input_price_extended: None,
            output_price_extended: None,
        }
    }

    /// Cost in USD cents (avoids floating point drift in the totals).
    /// Returns (input_cost_cents, output_cost_cents, total_cost_cents).
    pub fn calculate_cost_cents(
        &self,
        input_tokens: u32,
        output_tokens: u32,
        context_size: u32,
    ) -> (i64, i64, i64) {
        let use_extended = context_size > 200_000;

        let input_price = match self.input_price_extended {
            Some(extended) if use_extended => extended,
            _ => self.input_price,
        };
        let output_price = match self.output_price_extended {
            Some(extended) if use_extended => extended,
            _ => self.output_price,
        };

        let input_cost = (input_tokens as f64 / 1_000_000.0) * input_price * 100.0;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * output_price * 100.0;

        (
            input_cost.round() as i64,
            output_cost.round() as i64,
            (input_cost + output_cost).round() as i64,
        )
    }
}

/// Pricing table lookup; unknown models cost zero and log a warning.
pub fn for_model(model: &str) -> ModelPricing {
    match normalize_model_name(model).as_str() {
        "claude-sonnet-4-5" => ModelPricing::claude_sonnet_4_5(),
        "claude-haiku-4-5" => ModelPricing::claude_haiku_4_5(),
        "gemini-2.5-flash" => ModelPricing::gemini_2_5_flash(),
        other => {
            warn!("Unknown model for pricing: {}, using zero", other);
            ModelPricing::zero()
        }
    }
}

/// Collapses dated/suffixed model names onto pricing keys.
fn normalize_model_name(model: &str) -> String {
    if model.contains("claude-sonnet-4") {
        "claude-sonnet-4-5".to_string()
    } else if model.contains("claude-haiku-4") {
        "claude-haiku-4-5".to_string()
    } else if model.contains("gemini-2.5-flash") || model.contains("gemini-flash-2.5") {
        "gemini-2.5-flash".to_string()
    } else {
        model.to_string()
    }
}

/// Emits the usage/cost attribution line after a successful generation
/// call. Cache hits still report their token counts.
pub fn log_usage(
    response: &GenerationResponse,
    organization_id: Option<&str>,
    user_id: Option<&str>,
) {
    let Some(usage) = &response.usage else {
        return;
    };
    let pricing = for_model(&response.model);
    let (_, _, total_cents) =
        pricing.calculate_cost_cents(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens);
    info!(
        model = %response.model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        cost_cents = total_cents,
        cached = response.cached,
        organization_id = organization_id.unwrap_or("-"),
        user_id = user_id.unwrap_or("-"),
        "generation usage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_sonnet_4_5_cost_calculation() {
        let pricing = ModelPricing::claude_sonnet_4_5();

        // Small context (≤200K)
        let (input, output, total) = pricing.calculate_cost_cents(5000, 2000, 50_000);
        assert_eq!(input, 2); // (5000/1M) * 3.00 * 100 = 1.5¢ → rounds to 2¢
        assert_eq!(output, 3); // (2000/1M) * 15.00 * 100 = 3¢
        assert_eq!(total, 5);

        // Large context (>200K)
        let (input, output, total) = pricing.calculate_cost_cents(5000, 2000, 250_000);
        assert_eq!(input, 3); // (5000/1M) * 6.00 * 100 = 3¢
        assert_eq!(output, 5); // (2000/1M) * 22.50 * 100 = 4.5¢ → rounds to 5¢
        assert_eq!(total, 8);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        let pricing = for_model("mystery-model-9000");
        let (input, output, total) = pricing.calculate_cost_cents(1_000_000, 1_000_000, 0);
        assert_eq!((input, output, total), (0, 0, 0));
    }

    #[test]
    fn test_model_name_normalization() {
        assert_eq!(
            normalize_model_name("claude-sonnet-4-5-20250929"),
            "claude-sonnet-4-5"
        );
        assert_eq!(
            normalize_model_name("claude-haiku-4-5-latest"),
            "claude-haiku-4-5"
        );
        assert_eq!(normalize_model_name("gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(normalize_model_name("something-else"), "something-else");
    }
}
