use std::sync::Arc;

use dastyar_core::errors::AgentError;

use crate::budget::UsageMeter;
use crate::llm::LlmClient;
use crate::prompts::PRODUCT_FEATURE_RULES;
use crate::tools::ToolRegistry;

use super::product_search::{shopping_reply_schema, ShoppingReply};
use super::{run_shopping_exchange, AgentOutcome};

/// Answers attribute questions: resolve the product, then read the value
/// out of `extra_features` or the catalog columns. The answer keeps the
/// original term used in the data.
pub struct FeatureAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    model: String,
}

impl FeatureAgent {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, model: String) -> Self {
        Self { llm, registry, model }
    }

    pub async fn run(&self, prompt: &str, meter: &UsageMeter) -> Result<AgentOutcome, AgentError> {
        let outcome = run_shopping_exchange(
            self.llm.as_ref(),
            &self.registry,
            meter,
            &self.model,
            PRODUCT_FEATURE_RULES,
            prompt,
            "shopping_reply",
            shopping_reply_schema(),
        )
        .await?;

        let reply: ShoppingReply = outcome.parse_json()?;
        Ok(AgentOutcome::Shopping {
            message: reply.message,
            base_random_keys: reply.base_random_keys,
            member_random_keys: reply.member_random_keys,
            finished: reply.finished,
        })
    }
}
