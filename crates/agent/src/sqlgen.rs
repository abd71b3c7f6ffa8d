//! Natural-language-to-SQL resolver and the helpers for handling model-
//! written SQL: fence stripping and substring lookups.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use dastyar_core::errors::AgentError;
use dastyar_db::repositories::{CatalogRepository, RepositoryError};

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::prompts::SQL_GENERATOR_SYSTEM_PROMPT;

fn fence_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:sql)?\s*([\s\S]*?)```").expect("static pattern"))
}

/// Pull the SQL statement out of a model reply. Handles ```sql fences,
/// generic fences, and bare SQL; the result always ends with a single
/// semicolon.
pub fn extract_sql(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let body = match fence_pattern().captures(text) {
        Some(captures) => captures[1].trim().to_string(),
        None => text.trim().to_string(),
    };
    format!("{};", body.trim_end_matches(';').trim_end())
}

/// Substring lookup query over one column, always `LIKE '%…%'` and never
/// equality. The floor of 3 rows keeps vague Persian names from collapsing
/// to a single arbitrary match.
pub fn build_like_query(table: &str, column: &str, term: &str, limit: u32) -> String {
    let limit = limit.max(3);
    let term = term.replace('\'', "''");
    format!("SELECT * FROM {table} WHERE {column} LIKE '%{term}%' LIMIT {limit}")
}

/// Turns a natural-language instruction into SQL with the generator model,
/// then runs it against the catalog.
pub struct SqlResolver {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn CatalogRepository>,
    model: String,
}

impl SqlResolver {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: Arc<dyn CatalogRepository>, model: impl Into<String>) -> Self {
        Self { llm, catalog, model: model.into() }
    }

    pub async fn generate(
        &self,
        instruction: &str,
        meter: &UsageMeter,
    ) -> Result<String, AgentError> {
        meter.record_request()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(format!(
                    "{SQL_GENERATOR_SYSTEM_PROMPT}\n\n{}",
                    crate::prompts::SCHEMA_PROMPT
                )),
                ChatMessage::user(instruction),
            ],
        );
        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        let text = outcome.text.unwrap_or_default();
        let sql = extract_sql(&text);
        if sql.is_empty() {
            return Err(AgentError::ResolutionFailure(
                "generator produced no SQL statement".to_string(),
            ));
        }
        Ok(sql)
    }

    pub async fn execute(
        &self,
        query: &str,
        meter: &UsageMeter,
    ) -> Result<Vec<Value>, AgentError> {
        meter.record_tool_call()?;
        self.catalog.execute_select(query).await.map_err(|e| match e {
            RepositoryError::RejectedQuery(reason) => AgentError::ResolutionFailure(reason),
            other => AgentError::collaborator("catalog", other.to_string()),
        })
    }

    /// Generate-then-execute in one step.
    pub async fn resolve(
        &self,
        instruction: &str,
        meter: &UsageMeter,
    ) -> Result<Vec<Value>, AgentError> {
        let sql = self.generate(instruction, meter).await?;
        tracing::debug!(event_name = "sql_generated", sql = %sql);
        self.execute(&sql, meter).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use dastyar_core::errors::AgentError;
    use dastyar_db::repositories::{CandidateFilter, CatalogRepository, RepositoryError};

    use crate::budget::{UsageBudget, UsageMeter};
    use crate::llm::{ChatOutcome, ChatRequest, LlmClient};

    use super::{build_like_query, extract_sql, SqlResolver};

    struct CannedLlm {
        reply: &'static str,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
            Ok(ChatOutcome {
                text: Some(self.reply.to_string()),
                tool_calls: vec![],
                output_tokens: 7,
            })
        }
    }

    struct RecordingCatalog;

    #[async_trait]
    impl CatalogRepository for RecordingCatalog {
        async fn product_name(&self, _key: &str) -> Result<Option<String>, RepositoryError> {
            Ok(None)
        }

        async fn candidates_for(
            &self,
            _filter: &CandidateFilter,
            _limit: u32,
        ) -> Result<Vec<dastyar_core::CandidateShop>, RepositoryError> {
            Ok(vec![])
        }

        async fn execute_select(
            &self,
            query: &str,
        ) -> Result<Vec<serde_json::Value>, RepositoryError> {
            Ok(vec![serde_json::json!({"query": query})])
        }
    }

    fn resolver(reply: &'static str) -> SqlResolver {
        SqlResolver::new(Arc::new(CannedLlm { reply }), Arc::new(RecordingCatalog), "m")
    }

    fn meter(request_limit: u32) -> UsageMeter {
        UsageMeter::new(UsageBudget {
            request_limit,
            tool_call_limit: 10,
            output_token_limit: 4096,
        })
    }

    #[tokio::test]
    async fn resolve_charges_the_meter_per_generation() {
        let resolver = resolver("```sql\nSELECT 1\n```");
        let meter = meter(10);
        let rows = resolver.resolve("count everything", &meter).await.expect("resolve");
        assert_eq!(rows[0]["query"], "SELECT 1;");
        assert_eq!(meter.requests_used(), 1);
        assert_eq!(meter.tool_calls_used(), 1);
    }

    #[tokio::test]
    async fn an_exhausted_budget_stops_generation() {
        let resolver = resolver("SELECT 1");
        let meter = meter(0);
        let error = resolver.resolve("count everything", &meter).await.unwrap_err();
        assert!(matches!(error, AgentError::BudgetExceeded(_)));
    }

    #[test]
    fn fenced_sql_is_extracted() {
        let text = "Here is the query:\n```sql\nSELECT id FROM shops;\n```\nDone.";
        assert_eq!(extract_sql(text), "SELECT id FROM shops;");
    }

    #[test]
    fn generic_fences_and_bare_sql_are_handled() {
        assert_eq!(extract_sql("```\nSELECT 1\n```"), "SELECT 1;");
        assert_eq!(extract_sql("SELECT 1"), "SELECT 1;");
        assert_eq!(extract_sql("SELECT 1;;"), "SELECT 1;");
        assert_eq!(extract_sql("   "), "");
    }

    #[test]
    fn like_query_enforces_a_minimum_limit_and_substring_match() {
        let query = build_like_query("base_products", "persian_name", "میز", 1);
        assert!(query.ends_with("LIMIT 3"));
        assert!(query.contains("LIKE '%میز%'"));
    }

    #[test]
    fn like_query_escapes_embedded_quotes() {
        let query = build_like_query("base_products", "persian_name", "mi'z", 5);
        assert!(query.contains("'%mi''z%'"));
    }
}
