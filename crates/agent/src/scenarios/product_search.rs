use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dastyar_core::errors::AgentError;

use crate::budget::UsageMeter;
use crate::llm::LlmClient;
use crate::prompts::PRODUCT_SEARCH_RULES;
use crate::tools::ToolRegistry;

use super::{run_shopping_exchange, AgentOutcome};

/// The full shopping reply shape. Shared by the search and feature agents.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub(crate) struct ShoppingReply {
    pub message: Option<String>,
    pub base_random_keys: Option<Vec<String>>,
    pub member_random_keys: Option<Vec<String>>,
    #[serde(default)]
    pub finished: bool,
}

pub(crate) fn shopping_reply_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": {"type": ["string", "null"]},
            "base_random_keys": {"type": ["array", "null"], "items": {"type": "string"}, "maxItems": 1},
            "member_random_keys": {"type": ["array", "null"], "items": {"type": "string"}, "maxItems": 1},
            "finished": {"type": "boolean"},
        },
        "required": ["message", "base_random_keys", "member_random_keys", "finished"],
        "additionalProperties": false,
    })
}

/// Maps a concrete product request to one base random key via similarity
/// search. The only scenario that works without SQL access.
pub struct ProductSearchAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    model: String,
}

impl ProductSearchAgent {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, model: String) -> Self {
        Self { llm, registry, model }
    }

    pub async fn run(&self, prompt: &str, meter: &UsageMeter) -> Result<AgentOutcome, AgentError> {
        let outcome = run_shopping_exchange(
            self.llm.as_ref(),
            &self.registry,
            meter,
            &self.model,
            PRODUCT_SEARCH_RULES,
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use dastyar_core::errors::AgentError;

    use crate::budget::{UsageBudget, UsageMeter};
    use crate::llm::{ChatOutcome, ChatRequest, LlmClient};
    use crate::scenarios::AgentOutcome;
    use crate::tools::ToolRegistry;

    use super::ProductSearchAgent;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
            Ok(ChatOutcome { text: Some(self.0.clone()), tool_calls: vec![], output_tokens: 3 })
        }
    }

    fn meter() -> UsageMeter {
        UsageMeter::new(UsageBudget {
            request_limit: 30,
            tool_call_limit: 30,
            output_token_limit: 4096,
        })
    }

    #[tokio::test]
    async fn reply_maps_into_a_shopping_outcome() {
        let llm = Arc::new(CannedLlm(
            "{\"message\":null,\"base_random_keys\":[\"base-1\"],\"member_random_keys\":null,\"finished\":true}".to_string(),
        ));
        let agent = ProductSearchAgent::new(llm, Arc::new(ToolRegistry::default()), "m".to_string());
        let outcome = agent.run("Input: میز تحریر", &meter()).await.expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::Shopping {
                message: None,
                base_random_keys: Some(vec!["base-1".to_string()]),
                member_random_keys: None,
                finished: true,
            }
        );
    }

    #[tokio::test]
    async fn malformed_reply_is_a_collaborator_error() {
        let llm = Arc::new(CannedLlm("not json".to_string()));
        let agent = ProductSearchAgent::new(llm, Arc::new(ToolRegistry::default()), "m".to_string());
        assert!(agent.run("Input: میز", &meter()).await.is_err());
    }
}
