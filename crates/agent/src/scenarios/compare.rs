use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use dastyar_core::errors::AgentError;
use dastyar_core::DomainError;

use crate::budget::UsageMeter;
use crate::llm::LlmClient;
use crate::prompts::PRODUCTS_COMPARE_RULES;
use crate::tools::ToolRegistry;

use super::{run_shopping_exchange, AgentOutcome};

#[derive(Debug, Deserialize, PartialEq)]
struct CompareReply {
    message: Option<String>,
    base_random_keys: Option<Vec<String>>,
}

/// Picks one base out of the products the user is comparing and justifies
/// the choice. A chosen key list must contain exactly one element.
pub struct CompareAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    model: String,
}

impl CompareAgent {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, model: String) -> Self {
        Self { llm, registry, model }
    }

    pub async fn run(&self, prompt: &str, meter: &UsageMeter) -> Result<AgentOutcome, AgentError> {
        let outcome = run_shopping_exchange(
            self.llm.as_ref(),
            &self.registry,
            meter,
            &self.model,
            PRODUCTS_COMPARE_RULES,
            prompt,
            "compare_reply",
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": ["string", "null"]},
                    "base_random_keys": {
                        "type": ["array", "null"],
                        "items": {"type": "string"},
                        "minItems": 1,
                        "maxItems": 1,
                    },
                },
                "required": ["message", "base_random_keys"],
                "additionalProperties": false,
            }),
        )
        .await?;

        let reply: CompareReply = outcome.parse_json()?;
        if let Some(keys) = &reply.base_random_keys {
            if keys.len() != 1 || keys.iter().any(|k| k.trim().is_empty()) {
                return Err(AgentError::Validation(DomainError::TooManyKeys {
                    field: "base_random_keys",
                    len: keys.len(),
                }));
            }
        }
        Ok(AgentOutcome::Compare {
            message: reply.message,
            base_random_keys: reply.base_random_keys,
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

    use super::CompareAgent;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
            Ok(ChatOutcome { text: Some(self.0.clone()), tool_calls: vec![], output_tokens: 3 })
        }
    }

    fn agent(reply: &str) -> CompareAgent {
        CompareAgent::new(
            Arc::new(CannedLlm(reply.to_string())),
            Arc::new(ToolRegistry::default()),
            "m".to_string(),
        )
    }

    fn meter() -> UsageMeter {
        UsageMeter::new(UsageBudget {
            request_limit: 30,
            tool_call_limit: 30,
            output_token_limit: 4096,
        })
    }

    #[tokio::test]
    async fn a_single_choice_with_justification_is_accepted() {
        let outcome = agent(
            "{\"message\":\"ماگ سرامیکی مناسب‌تر است\",\"base_random_keys\":[\"base-7\"]}",
        )
        .run("Input: مقایسه", &meter())
        .await
        .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::Compare {
                message: Some("ماگ سرامیکی مناسب‌تر است".to_string()),
                base_random_keys: Some(vec!["base-7".to_string()]),
            }
        );
    }

    #[tokio::test]
    async fn two_chosen_keys_are_rejected() {
        let error = agent("{\"message\":null,\"base_random_keys\":[\"a\",\"b\"]}")
            .run("Input: مقایسه", &meter())
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::Validation(_)));
    }
}
