//! LLM escalation for listings the rules can't settle.
//!
//! Responses are strict JSON against `RiskVerdict`'s schema; anything that
//! deviates surfaces as an error and the caller falls back to the rule
//! result with `llm_unavailable` set. Never block the pipeline on this.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ai_client::ChatClient;
use carscout_common::RiskLevel;

use crate::deps::RiskLlm;

/// Bump on any prompt edit — the response cache keys on it.
pub const PROMPT_VERSION: &str = "risk-v2";

#[derive(Debug, Clone)]
pub struct RiskPrompt {
    pub title: String,
    pub description: String,
    pub features: Vec<String>,
    pub price_bgn: Option<f64>,
    pub predicted_price_bgn: Option<f64>,
    pub discount_pct: Option<f64>,
    pub red_flag_count: usize,
    pub positive_flag_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RiskVerdict {
    pub risk_level: RiskLevel,
    /// The model's own certainty, in [0,1].
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// 2–3 sentence summary in Bulgarian.
    pub summary: String,
    pub buyer_notes: String,
}

impl RiskPrompt {
    pub fn system() -> &'static str {
        "You are an expert at evaluating used car listings in Bulgaria. \
         Analyze the listing and identify potential risks or red flags. \
         Focus on Bulgarian-specific patterns and scams."
    }

    pub fn user(&self) -> String {
        let pricing = match (self.price_bgn, self.predicted_price_bgn, self.discount_pct) {
            (Some(price), Some(predicted), Some(discount)) => format!(
                "- Asking Price: {price:.0} BGN\n- Market Estimate: {predicted:.0} BGN\n- Discount: {:.1}%",
                discount * 100.0
            ),
            (Some(price), _, _) => format!("- Asking Price: {price:.0} BGN\n- Market Estimate: unknown"),
            _ => "- Pricing unknown".to_string(),
        };

        let features = if self.features.is_empty() {
            "n/a".to_string()
        } else {
            self.features.join(", ")
        };

        format!(
            "Analyze this Bulgarian used car listing:\n\n\
             **Title:** {}\n\n\
             **Description:**\n{}\n\n\
             **Features:** {}\n\n\
             **Pricing:**\n{}\n\n\
             **Initial Flags:**\n- Red Flags: {}\n- Positive Flags: {}\n\n\
             Consider:\n\
             1. Signs of accident damage or salvage title\n\
             2. Mileage authenticity concerns\n\
             3. Import history red flags\n\
             4. Maintenance and ownership claims\n\
             5. Pricing relative to market (why such discount?)\n\
             6. Urgency or pressure tactics\n\
             7. Overly positive language (too good to be true)\n\n\
             Write the summary in Bulgarian.",
            self.title,
            self.description,
            features,
            pricing,
            self.red_flag_count,
            self.positive_flag_count
        )
    }
}

/// The production escalation path: chat completion with strict output.
pub struct ChatRiskLlm {
    client: ChatClient,
}

impl ChatRiskLlm {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RiskLlm for ChatRiskLlm {
    async fn evaluate(&self, prompt: &RiskPrompt) -> Result<RiskVerdict> {
        let mut verdict: RiskVerdict = self
            .client
            .extract(RiskPrompt::system(), &prompt.user())
            .await?;
        verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_pricing_context() {
        let prompt = RiskPrompt {
            title: "BMW X5".into(),
            description: "Спешно".into(),
            features: vec!["кожен салон".into()],
            price_bgn: Some(24000.0),
            predicted_price_bgn: Some(32000.0),
            discount_pct: Some(0.25),
            red_flag_count: 1,
            positive_flag_count: 0,
        };
        let user = prompt.user();
        assert!(user.contains("24000 BGN"));
        assert!(user.contains("25.0%"));
        assert!(user.contains("Red Flags: 1"));
    }

    #[test]
    fn verdict_deserializes_from_strict_json() {
        let raw = r#"{
            "risk_level": "yellow",
            "confidence": 0.8,
            "reasons": ["пресен внос", "без сервизна история"],
            "summary": "Обявата изглежда рискова.",
            "buyer_notes": "Поискайте сервизна история."
        }"#;
        let verdict: RiskVerdict = serde_json::from_str(raw).unwrap();
        assert_eq!(verdict.risk_level, RiskLevel::Yellow);
        assert_eq!(verdict.reasons.len(), 2);
    }
}
