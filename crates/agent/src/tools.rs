//! Tools exposed to the shopping models and the bounded loop that services
//! their calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use dastyar_core::errors::AgentError;
use dastyar_db::repositories::CatalogRepository;

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatOutcome, ChatRequest, LlmClient};
use crate::similarity::{
    search_with_escalation, ScorePolicy, SimilarityResolver, DEFAULT_PROBES, DEFAULT_TOP_K,
};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// OpenAI function definition, sent verbatim in the request payload.
    fn definition(&self) -> Value;

    /// One prompt line describing when to reach for this tool.
    fn prompt_line(&self) -> &'static str;

    async fn execute(&self, input: Value) -> Result<Value, AgentError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn definitions(&self) -> Vec<Value> {
        let mut definitions: Vec<(&str, Value)> =
            self.tools.iter().map(|(name, tool)| (*name, tool.definition())).collect();
        definitions.sort_by_key(|(name, _)| *name);
        definitions.into_iter().map(|(_, definition)| definition).collect()
    }

    pub fn prompt_lines(&self) -> String {
        let mut lines: Vec<&str> = self.tools.values().map(|tool| tool.prompt_line()).collect();
        lines.sort_unstable();
        lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<Value, AgentError> {
        let tool = self.tools.get(name).ok_or_else(|| {
            AgentError::ResolutionFailure(format!("model requested unknown tool `{name}`"))
        })?;
        tool.execute(input).await
    }
}

/// `similarity_search(query, top_k, probes)` over the embedding index.
pub struct SimilaritySearchTool {
    resolver: Arc<dyn SimilarityResolver>,
    policy: ScorePolicy,
}

impl SimilaritySearchTool {
    pub fn new(resolver: Arc<dyn SimilarityResolver>) -> Self {
        Self { resolver, policy: ScorePolicy::default() }
    }
}

#[async_trait]
impl Tool for SimilaritySearchTool {
    fn name(&self) -> &'static str {
        "similarity_search"
    }

    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": "similarity_search",
                "description": "Semantic similarity search over catalog products. Returns (random_key, persian_name, similarity) tuples, best first.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Full product name, in Persian"},
                        "top_k": {"type": "integer", "description": "How many candidates to return"},
                        "probes": {"type": "integer", "description": "Recall knob; higher is slower but more thorough"},
                    },
                    "required": ["query"],
                },
            },
        })
    }

    fn prompt_line(&self) -> &'static str {
        "similarity_search(query, top_k = 5, probes = 20): map user text to base product random keys, even when wording differs from the catalog name."
    }

    async fn execute(&self, input: Value) -> Result<Value, AgentError> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ResolutionFailure("similarity_search needs a query".to_string()))?;
        let top_k = input.get("top_k").and_then(Value::as_u64).map(|v| v as usize);
        let probes = input.get("probes").and_then(Value::as_u64).map(|v| v as u32);

        // Explicit recall parameters are honored verbatim; the default path
        // widens recall once when everything lands in the noise band.
        let hits = match (top_k, probes) {
            (None, None) => {
                search_with_escalation(self.resolver.as_ref(), &self.policy, query).await?
            }
            (top_k, probes) => {
                self.resolver
                    .search(
                        query,
                        top_k.unwrap_or(DEFAULT_TOP_K),
                        probes.unwrap_or(DEFAULT_PROBES),
                    )
                    .await?
            }
        };
        Ok(json!(hits))
    }
}

/// `execute_sql(query)` against the read-only catalog. Execution failures
/// come back as an error string payload so the model can correct its query
/// instead of aborting the request.
pub struct ExecuteSqlTool {
    catalog: Arc<dyn CatalogRepository>,
}

impl ExecuteSqlTool {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }

    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": "execute_sql",
                "description": "Execute a single read-only SELECT query against the catalog and return the rows.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "A single SELECT statement"},
                    },
                    "required": ["query"],
                },
            },
        })
    }

    fn prompt_line(&self) -> &'static str {
        "execute_sql(query): run a SELECT statement against the catalog schema and get the rows back."
    }

    async fn execute(&self, input: Value) -> Result<Value, AgentError> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ResolutionFailure("execute_sql needs a query".to_string()))?;
        // Models sometimes wrap the statement in markdown fences.
        let query = crate::sqlgen::extract_sql(query);
        match self.catalog.execute_select(&query).await {
            Ok(rows) => Ok(json!(rows)),
            Err(error) => Ok(Value::String(format!("-- ERROR executing query: {error}"))),
        }
    }
}

/// Drive one model exchange to completion: service tool calls until the
/// model produces a final message, charging every round trip and tool call
/// to the meter.
pub async fn run_tool_loop(
    llm: &dyn LlmClient,
    registry: &ToolRegistry,
    meter: &UsageMeter,
    mut request: ChatRequest,
) -> Result<ChatOutcome, AgentError> {
    if !registry.is_empty() && request.tools.is_empty() {
        request.tools = registry.definitions();
    }

    loop {
        meter.record_request()?;
        let outcome = llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;

        if outcome.tool_calls.is_empty() {
            return Ok(outcome);
        }

        request.messages.push(ChatMessage::Assistant {
            text: outcome.text.clone(),
            tool_calls: outcome.tool_calls.clone(),
        });

        for call in &outcome.tool_calls {
            meter.record_tool_call()?;
            let content = match registry.execute(&call.name, call.arguments.clone()).await {
                Ok(result) => result.to_string(),
                // Recoverable tool failures go back to the model as text.
                Err(error) if error.is_recoverable() => format!("-- ERROR: {error}"),
                Err(error) => return Err(error),
            };
            tracing::debug!(event_name = "tool_executed", tool = %call.name);
            request
                .messages
                .push(ChatMessage::ToolResult { call_id: call.id.clone(), content });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use dastyar_core::errors::AgentError;
    use dastyar_core::ProductHit;

    use crate::budget::{UsageBudget, UsageMeter};
    use crate::llm::{ChatMessage, ChatOutcome, ChatRequest, LlmClient, ToolCall};
    use crate::similarity::SimilarityResolver;

    use super::{run_tool_loop, SimilaritySearchTool, Tool, ToolRegistry};

    struct FixedResolver;

    #[async_trait]
    impl SimilarityResolver for FixedResolver {
        async fn search(
            &self,
            _query: &str,
            top_k: usize,
            _probes: u32,
        ) -> Result<Vec<ProductHit>, AgentError> {
            Ok(vec![ProductHit {
                base_random_key: format!("key-{top_k}"),
                persian_name: "میز تحریر".to_string(),
                similarity: 0.91,
            }])
        }
    }

    struct ScriptedLlm {
        calls: AtomicUsize,
        outcomes: Vec<ChatOutcome>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcomes[call.min(self.outcomes.len() - 1)].clone())
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
    async fn similarity_tool_honors_top_k_argument() {
        let tool = SimilaritySearchTool::new(Arc::new(FixedResolver));
        let result = tool
            .execute(json!({"query": "میز تحریر", "top_k": 3}))
            .await
            .expect("execute");
        assert_eq!(result[0]["base_random_key"], "key-3");
    }

    struct TwoPassResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SimilarityResolver for TwoPassResolver {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _probes: u32,
        ) -> Result<Vec<ProductHit>, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (key, similarity) = if call == 0 { ("weak", 0.3) } else { ("wide-pass", 0.85) };
            Ok(vec![ProductHit {
                base_random_key: key.to_string(),
                persian_name: "میز تحریر".to_string(),
                similarity,
            }])
        }
    }

    #[tokio::test]
    async fn default_search_widens_recall_when_scores_are_noise() {
        let resolver = Arc::new(TwoPassResolver { calls: AtomicUsize::new(0) });
        let tool = SimilaritySearchTool::new(resolver.clone());
        let result = tool.execute(json!({"query": "میز"})).await.expect("execute");
        assert_eq!(result[0]["base_random_key"], "wide-pass");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn explicit_recall_parameters_skip_the_widened_retry() {
        let resolver = Arc::new(TwoPassResolver { calls: AtomicUsize::new(0) });
        let tool = SimilaritySearchTool::new(resolver.clone());
        let result = tool.execute(json!({"query": "میز", "top_k": 3})).await.expect("execute");
        assert_eq!(result[0]["base_random_key"], "weak");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_names_are_rejected_as_recoverable() {
        let registry = ToolRegistry::default();
        let error = registry.execute("no_such_tool", json!({})).await.unwrap_err();
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn tool_loop_services_calls_then_returns_the_final_text() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(SimilaritySearchTool::new(Arc::new(FixedResolver))));

        let llm = ScriptedLlm {
            calls: AtomicUsize::new(0),
            outcomes: vec![
                ChatOutcome {
                    text: None,
                    tool_calls: vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "similarity_search".to_string(),
                        arguments: json!({"query": "میز"}),
                    }],
                    output_tokens: 10,
                },
                ChatOutcome {
                    text: Some("{\"message\":\"انجام شد\"}".to_string()),
                    tool_calls: vec![],
                    output_tokens: 5,
                },
            ],
        };

        let meter = meter();
        let request = ChatRequest::new("m", vec![ChatMessage::user("میز")]);
        let outcome = run_tool_loop(&llm, &registry, &meter, request).await.expect("loop");

        assert_eq!(outcome.text.as_deref(), Some("{\"message\":\"انجام شد\"}"));
        assert_eq!(meter.requests_used(), 2);
        assert_eq!(meter.tool_calls_used(), 1);
    }

    #[tokio::test]
    async fn tool_loop_stops_when_the_tool_budget_runs_out() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(SimilaritySearchTool::new(Arc::new(FixedResolver))));

        let looping_call = ChatOutcome {
            text: None,
            tool_calls: vec![ToolCall {
                id: "call_n".to_string(),
                name: "similarity_search".to_string(),
                arguments: json!({"query": "میز"}),
            }],
            output_tokens: 1,
        };
        let llm = ScriptedLlm { calls: AtomicUsize::new(0), outcomes: vec![looping_call] };

        let meter = UsageMeter::new(UsageBudget {
            request_limit: 100,
            tool_call_limit: 2,
            output_token_limit: 10_000,
        });
        let request = ChatRequest::new("m", vec![ChatMessage::user("میز")]);
        let error = run_tool_loop(&llm, &registry, &meter, request).await.unwrap_err();
        assert!(matches!(error, AgentError::BudgetExceeded(_)));
    }
}
