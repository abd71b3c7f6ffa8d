use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::json;

use dastyar_core::errors::AgentError;

use crate::budget::UsageMeter;
use crate::llm::LlmClient;
use crate::prompts::NUMERIC_VALUE_RULES;
use crate::tools::ToolRegistry;

use super::{run_shopping_exchange, AgentOutcome};

#[derive(Debug, Deserialize, PartialEq)]
struct NumericReply {
    #[serde(deserialize_with = "lenient_f64")]
    value: f64,
}

/// The model occasionally emits the number as a string; accept both, reject
/// anything non-numeric.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("value is not representable as f64")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("`{s}` is not a number"))),
        other => Err(serde::de::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// Computes a single numeric answer (price, count, average) through SQL and
/// similarity lookups.
pub struct NumericAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    model: String,
}

impl NumericAgent {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, model: String) -> Self {
        Self { llm, registry, model }
    }

    pub async fn run(&self, prompt: &str, meter: &UsageMeter) -> Result<AgentOutcome, AgentError> {
        let outcome = run_shopping_exchange(
            self.llm.as_ref(),
            &self.registry,
            meter,
            &self.model,
            NUMERIC_VALUE_RULES,
            prompt,
            "numeric_reply",
            json!({
                "type": "object",
                "properties": {"value": {"type": ["number", "string"]}},
                "required": ["value"],
                "additionalProperties": false,
            }),
        )
        .await?;

        let reply: NumericReply = outcome.parse_json()?;
        Ok(AgentOutcome::Numeric { value: reply.value })
    }
}
