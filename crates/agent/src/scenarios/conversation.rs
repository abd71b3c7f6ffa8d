//! Multi-turn narrowing toward a single seller listing. The agent gathers
//! constraints for up to four turns, presents the current best candidate
//! along the way, and must finalize on the fifth turn with exactly one
//! member random key.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use dastyar_core::domain::conversation::MAX_TURNS;
use dastyar_core::errors::AgentError;
use dastyar_core::{CandidateShop, ExtraInfoConversation};

use crate::budget::UsageMeter;
use crate::llm::{ChatMessage, ChatRequest, LlmClient};
use crate::prompts::{CONVERSATION_RULES, FIFTH_TURN_NOTICE, SYSTEM_ROLE};
use crate::sqlgen::{build_like_query, SqlResolver};
use crate::tools::ToolRegistry;

use dastyar_db::repositories::{CandidateFilter, CatalogRepository};

use super::product_search::{shopping_reply_schema, ShoppingReply};
use super::{run_shopping_exchange, AgentOutcome};

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract shopping constraints from the user's latest message in a Persian product-finding conversation.

For each constraint field, output:
- null when the user said nothing about it,
- the string "ignore" when the user declined to state a preference ("فرقی نداره", "مهم نیست"),
- the concrete value otherwise.

Constraint fields:
- product_name: the product the user wants, as a full Persian name.
- product_features: stated variations such as رنگ, اندازه, جنس.
- price_range: object with integer min and max in rials; either side may be null.
- city_name: the delivery city.
- has_warranty: whether the shop must offer a warranty.
- score: minimum acceptable shop rating, 0 to 5.
- brand_title: the preferred brand.

Additionally output:
- confirmed: true when the user explicitly accepts a listing the assistant presented ("همین خوبه", "همونو می‌خوام"), false when they reject it, null otherwise.

Extract only what the latest message states. Never carry over or invent values."#;

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "product_name": {"type": ["string", "null"]},
            "product_features": {"type": ["string", "null"]},
            "price_range": {
                "type": ["object", "string", "null"],
                "properties": {
                    "min": {"type": ["integer", "null"]},
                    "max": {"type": ["integer", "null"]},
                },
            },
            "city_name": {"type": ["string", "null"]},
            "has_warranty": {"type": ["boolean", "string", "null"]},
            "score": {"type": ["number", "string", "null"]},
            "brand_title": {"type": ["string", "null"]},
            "confirmed": {"type": ["boolean", "null"]},
        },
        "required": [
            "product_name", "product_features", "price_range", "city_name",
            "has_warranty", "score", "brand_title", "confirmed",
        ],
        "additionalProperties": false,
    })
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedTurn {
    #[serde(flatten)]
    constraints: ExtraInfoConversation,
    confirmed: Option<bool>,
}

/// Persian question templates, one per constraint field, in ask order.
/// Used when the question model returns nothing usable.
fn consolidated_fallback(fields: &[&'static str]) -> String {
    fields.iter().map(|field| fallback_question(field)).collect::<Vec<_>>().join("\n")
}

fn fallback_question(field: &str) -> &'static str {
    match field {
        "product_name" => "دقیقا دنبال چه محصولی هستید؟",
        "price_range" => "چه محدوده قیمتی مد نظرتان است؟",
        "city_name" => "در کدام شهر می‌خواهید خرید کنید؟",
        "has_warranty" => "آیا گارانتی فروشگاه برایتان مهم است؟",
        "score" => "حداقل امتیاز فروشگاه چقدر باشد؟",
        "product_features" => "چه ویژگی‌هایی مثل رنگ یا اندازه مد نظرتان است؟",
        _ => "برند خاصی مد نظرتان است؟",
    }
}

fn filter_from_state(state: &ExtraInfoConversation) -> CandidateFilter {
    CandidateFilter {
        base_random_keys: Vec::new(),
        product_name_like: state.product_name.value().cloned(),
        city_name: state.city_name.value().cloned(),
        has_warranty: state.has_warranty.value().copied(),
        min_score: state.score.value().copied(),
        brand_title_like: state.brand_title.value().cloned(),
        min_price: state.price_range.value().and_then(|range| range.min),
        max_price: state.price_range.value().and_then(|range| range.max),
    }
}

/// Everything the orchestrator hands over for one conversation turn.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    pub turn_index: u8,
    pub history_prompt: String,
    pub user_message: String,
    pub state: ExtraInfoConversation,
}

pub struct ConversationAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    catalog: Arc<dyn CatalogRepository>,
    sql: SqlResolver,
    model: String,
}

impl ConversationAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        catalog: Arc<dyn CatalogRepository>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let sql = SqlResolver::new(llm.clone(), catalog.clone(), model.clone());
        Self { llm, registry, catalog, sql, model }
    }

    pub async fn run(
        &self,
        context: &ConversationContext,
        meter: &UsageMeter,
    ) -> Result<AgentOutcome, AgentError> {
        let mut state = context.state.clone();
        let extracted = self.extract_turn(&context.user_message, meter).await?;
        state.merge(&extracted.constraints);

        // Early finalization requires the user's explicit yes to a listing
        // that was actually presented; a complete constraint set alone does
        // not cut the conversation short.
        let confirmed = extracted.confirmed == Some(true) && !state.product_name.is_unset();
        if context.turn_index >= MAX_TURNS || confirmed {
            return self.finalize(context, state, meter).await;
        }

        // The opening turn only gathers constraints; candidate lookup starts
        // on turn two.
        let suggestion = if context.turn_index >= 2 && state.product_name.value().is_some() {
            self.top_candidate(&state).await
        } else {
            None
        };

        let missing = state.missing_fields();
        let question = if missing.is_empty() {
            // Nothing left to ask; invite confirmation of the candidate.
            "آیا همین مورد را می‌خواهید؟".to_string()
        } else if context.turn_index <= 1 {
            // One consolidated message covering every field still unknown.
            self.ask_question(context, &state, &missing, meter)
                .await
                .unwrap_or_else(|_| consolidated_fallback(&missing))
        } else {
            self.ask_question(context, &state, &missing[..1], meter)
                .await
                .unwrap_or_else(|_| fallback_question(missing[0]).to_string())
        };

        let message = match suggestion {
            Some(candidate) => {
                format!("پیشنهاد فعلی: {}\n{}", candidate.display_line(), question)
            }
            None => question,
        };

        Ok(AgentOutcome::Conversation {
            message: Some(message),
            member_random_keys: None,
            finished: false,
            extra_info: Some(state),
        })
    }

    async fn extract_turn(
        &self,
        user_message: &str,
        meter: &UsageMeter,
    ) -> Result<ExtractedTurn, AgentError> {
        meter.record_request()?;
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(EXTRACTION_SYSTEM_PROMPT.to_string()),
                ChatMessage::user(user_message),
            ],
        )
        .with_schema("constraint_extraction", extraction_schema());

        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        outcome.parse_json()
    }

    /// Best listing under the current constraints, used for the running
    /// suggestion. Lookup failures degrade to no suggestion.
    async fn top_candidate(&self, state: &ExtraInfoConversation) -> Option<CandidateShop> {
        match self.catalog.candidates_for(&filter_from_state(state), 1).await {
            Ok(candidates) => candidates.into_iter().next(),
            Err(error) => {
                tracing::warn!(event_name = "candidate_lookup_failed", error = %error);
                None
            }
        }
    }

    async fn ask_question(
        &self,
        context: &ConversationContext,
        state: &ExtraInfoConversation,
        fields: &[&'static str],
        meter: &UsageMeter,
    ) -> Result<String, AgentError> {
        meter.record_request()?;
        let state_json = serde_json::to_string(state)
            .map_err(|e| AgentError::collaborator("llm", e.to_string()))?;
        let ask = if fields.len() == 1 {
            format!("Ask one short Persian clarification question about `{}`.", fields[0])
        } else {
            format!(
                "Ask one short Persian message that requests, all together, every one of \
                 these still-unknown fields: `{}`.",
                fields.join("`, `")
            )
        };
        let prompt = format!(
            "{}Known constraints so far: {state_json}\n\nLatest user message: {}\n\n\
             {ask} Do not repeat a question the user already answered or declined.",
            context.history_prompt, context.user_message
        );

        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::System(format!("{SYSTEM_ROLE}\n\n{CONVERSATION_RULES}")),
                ChatMessage::user(prompt),
            ],
        )
        .with_schema(
            "clarification_question",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"],
                "additionalProperties": false,
            }),
        );

        let outcome = self.llm.chat(&request).await?;
        meter.record_output_tokens(outcome.output_tokens)?;
        let reply: serde_json::Value = outcome.parse_json()?;
        reply
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AgentError::ResolutionFailure("empty clarification question".to_string()))
    }

    /// Final resolution: the model gets first shot with its tools; if it
    /// does not produce a member key, the accumulated constraints are
    /// applied directly to the catalog. A shop id never stands in for the
    /// member key.
    async fn finalize(
        &self,
        context: &ConversationContext,
        state: ExtraInfoConversation,
        meter: &UsageMeter,
    ) -> Result<AgentOutcome, AgentError> {
        let state_json = serde_json::to_string(&state)
            .map_err(|e| AgentError::collaborator("llm", e.to_string()))?;
        let prompt = format!(
            "{}{FIFTH_TURN_NOTICE}\n\nAccumulated constraints: {state_json}\n\nInput: {}",
            context.history_prompt, context.user_message
        );

        let reply = match run_shopping_exchange(
            self.llm.as_ref(),
            &self.registry,
            meter,
            &self.model,
            CONVERSATION_RULES,
            &prompt,
            "shopping_reply",
            shopping_reply_schema(),
        )
        .await
        {
            Ok(outcome) => outcome.parse_json::<ShoppingReply>().unwrap_or_default(),
            Err(error) if error.is_recoverable() => ShoppingReply::default(),
            Err(error) => return Err(error),
        };

        let member_key = reply
            .member_random_keys
            .as_ref()
            .filter(|keys| keys.len() == 1 && !keys[0].trim().is_empty())
            .map(|keys| keys[0].clone());

        if let Some(key) = member_key {
            return Ok(AgentOutcome::Conversation {
                message: reply.message,
                member_random_keys: Some(vec![key]),
                finished: true,
                extra_info: Some(state),
            });
        }

        // Deterministic fallback: the constraints themselves select the
        // listing. Candidates come back best shop first.
        tracing::info!(event_name = "conversation_sql_fallback", turn = context.turn_index);
        let candidates = self
            .catalog
            .candidates_for(&filter_from_state(&state), 10)
            .await
            .map_err(|e| AgentError::collaborator("catalog", e.to_string()))?;

        if let Some(best) = candidates.first() {
            return Ok(AgentOutcome::Conversation {
                message: Some(best.display_line()),
                member_random_keys: Some(vec![best.member_random_key.clone()]),
                finished: true,
                extra_info: Some(state),
            });
        }

        // Last resort: let the generator write the lookup itself over the
        // same constraints.
        let key = self.resolve_member_by_sql(&state, &state_json, meter).await?;
        Ok(AgentOutcome::Conversation {
            message: None,
            member_random_keys: Some(vec![key]),
            finished: true,
            extra_info: Some(state),
        })
    }

    async fn resolve_member_by_sql(
        &self,
        state: &ExtraInfoConversation,
        state_json: &str,
        meter: &UsageMeter,
    ) -> Result<String, AgentError> {
        let mut instruction = format!(
            "Return the member random key of the single best seller listing for these \
             constraints: {state_json}. The query must expose the column as \
             `member_random_key` and order shops by score, best first."
        );
        if let Some(name) = state.product_name.value() {
            let probe = build_like_query("base_products", "persian_name", name, 5);
            if let Ok(rows) = self.sql.execute(&probe, meter).await {
                if !rows.is_empty() {
                    instruction.push_str(&format!(
                        "\nBase products already known to match the name: {}",
                        serde_json::Value::Array(rows)
                    ));
                }
            }
        }

        let rows = self.sql.resolve(&instruction, meter).await?;
        rows.iter()
            .find_map(|row| row.get("member_random_key").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AgentError::ResolutionFailure(
                    "no listing satisfies the accumulated constraints".to_string(),
                )
            })
    }
}
