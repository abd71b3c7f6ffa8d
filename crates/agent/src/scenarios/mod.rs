//! Scenario agents: one per classified request shape, all funneling into
//! [`AgentOutcome`] for normalization.

use std::sync::Arc;

use serde_json::Value;

use dastyar_core::errors::AgentError;
use dastyar_core::{ExtraInfoConversation, ScenarioLabel};

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatOutcome, ChatRequest, LlmClient};
use crate::prompts::shopping_system_prompt;
use crate::tools::{run_tool_loop, ToolRegistry};

pub mod compare;
pub mod conversation;
pub mod feature;
pub mod image;
pub mod numeric;
pub mod product_search;

pub use compare::CompareAgent;
pub use conversation::{ConversationAgent, ConversationContext};
pub use feature::FeatureAgent;
pub use image::{ImageAgent, ImageReply};
pub use numeric::NumericAgent;
pub use product_search::ProductSearchAgent;

/// What a scenario agent produced, before normalization into the single
/// outward response shape.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentOutcome {
    Shopping {
        message: Option<String>,
        base_random_keys: Option<Vec<String>>,
        member_random_keys: Option<Vec<String>>,
        finished: bool,
    },
    Compare {
        message: Option<String>,
        base_random_keys: Option<Vec<String>>,
    },
    Numeric {
        value: f64,
    },
    Image {
        main_topic: Option<String>,
    },
    Conversation {
        message: Option<String>,
        member_random_keys: Option<Vec<String>>,
        finished: bool,
        extra_info: Option<ExtraInfoConversation>,
    },
    Classification {
        label: ScenarioLabel,
    },
    /// Anything that does not match a known shape; stringified as-is.
    Raw(String),
}

/// One model exchange in the shopping configuration: scenario rules plus the
/// shared notes, schema, and tool roster, serviced through the tool loop.
pub(crate) async fn run_shopping_exchange(
    llm: &dyn LlmClient,
    registry: &ToolRegistry,
    meter: &UsageMeter,
    model: &str,
    scenario_rules: &str,
    prompt: &str,
    schema_name: &str,
    schema: Value,
) -> Result<ChatOutcome, AgentError> {
    let system = shopping_system_prompt(scenario_rules, &registry.prompt_lines());
    let request = ChatRequest::new(
        model.to_string(),
        vec![ChatMessage::System(system), ChatMessage::user(prompt)],
    )
    .with_schema(schema_name, schema);
    run_tool_loop(llm, registry, meter, request).await
}

/// Label-directed dispatch over the text scenario agents. The conversation
/// scenario is driven separately by the orchestrator because it carries
/// cross-turn state.
pub struct ScenarioRunner {
    pub product_search: ProductSearchAgent,
    pub feature: FeatureAgent,
    pub numeric: NumericAgent,
    pub compare: CompareAgent,
}

impl ScenarioRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        search_registry: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            product_search: ProductSearchAgent::new(
                llm.clone(),
                search_registry,
                model.clone(),
            ),
            feature: FeatureAgent::new(llm.clone(), registry.clone(), model.clone()),
            numeric: NumericAgent::new(llm.clone(), registry.clone(), model.clone()),
            compare: CompareAgent::new(llm, registry, model),
        }
    }

    pub async fn run(
        &self,
        label: ScenarioLabel,
        prompt: &str,
        meter: &UsageMeter,
    ) -> Result<AgentOutcome, AgentError> {
        match label {
            ScenarioLabel::ProductSearch => self.product_search.run(prompt, meter).await,
            ScenarioLabel::ProductFeature => self.feature.run(prompt, meter).await,
            ScenarioLabel::NumericValue => self.numeric.run(prompt, meter).await,
            ScenarioLabel::ProductsCompare => self.compare.run(prompt, meter).await,
            other => Err(AgentError::Validation(
                dastyar_core::DomainError::InvariantViolation(format!(
                    "scenario {other} is not dispatched through the text runner"
                )),
            )),
        }
    }
}
