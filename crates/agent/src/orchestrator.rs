//! The hybrid pipeline behind every chat request: route, retrieve, dispatch,
//! normalize, persist. No error crosses this boundary; failures collapse
//! into the uniform `-- ERROR:` response shape.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use dastyar_core::domain::conversation::{ConversationTurn, HISTORY_LIMIT};
use dastyar_core::errors::AgentError;
use dastyar_core::{normalize_persian, NormalizedResponse, ProductHit, ScenarioLabel};
use dastyar_db::repositories::{ConversationRepository, RepositoryError};

use crate::budget::{UsageBudget, UsageMeter};
use crate::classifier::{ImageRouteClassifier, IntentClassifier};
use crate::normalize::normalize;
use crate::scenarios::conversation::{ConversationAgent, ConversationContext};
use crate::scenarios::image::{ImageAgent, ImageReply};
use crate::scenarios::{AgentOutcome, ScenarioRunner};
use crate::similarity::{
    search_with_escalation, MatchStrength, ScorePolicy, SimilarityResolver, DEFAULT_PROBES,
    DEFAULT_TOP_K,
};

/// How many caption-derived queries an image search fans out into.
const IMAGE_QUERY_FANOUT: usize = 5;

fn repo_error(error: RepositoryError) -> AgentError {
    AgentError::collaborator("database", error.to_string())
}

pub struct HybridOrchestrator {
    pub conversations: Arc<dyn ConversationRepository>,
    pub classifier: IntentClassifier,
    pub image_router: ImageRouteClassifier,
    pub image_agent: ImageAgent,
    pub runner: ScenarioRunner,
    pub conversation: ConversationAgent,
    pub similarity: Arc<dyn SimilarityResolver>,
    pub policy: ScorePolicy,
    pub budget: UsageBudget,
}

impl HybridOrchestrator {
    /// Service one chat request end to end. Always returns a response.
    pub async fn handle(
        &self,
        chat_id: &str,
        message: &str,
        image_data_uri: Option<&str>,
    ) -> NormalizedResponse {
        let meter = UsageMeter::new(self.budget);
        match self.handle_inner(chat_id, message, image_data_uri, &meter).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(event_name = "request_failed", chat_id, error = %error);
                NormalizedResponse::error(error)
            }
        }
    }

    async fn handle_inner(
        &self,
        chat_id: &str,
        message: &str,
        image_data_uri: Option<&str>,
        meter: &UsageMeter,
    ) -> Result<NormalizedResponse, AgentError> {
        if let Some(uri) = image_data_uri {
            return self.handle_image(chat_id, message, uri, meter).await;
        }

        let (base_id, turn_index) =
            self.conversations.resolve_identity(chat_id).await.map_err(repo_error)?;
        let history = self
            .conversations
            .recent_turns(&base_id, HISTORY_LIMIT)
            .await
            .map_err(repo_error)?;
        let preprocessed = normalize_persian(message);

        // Any prior turn pins the exchange to the conversation scenario; the
        // classifier only sees opening messages.
        let label = if history.is_empty() {
            self.classifier.classify(&preprocessed, meter).await?
        } else {
            ScenarioLabel::Conversation
        };
        tracing::info!(event_name = "scenario_dispatch", chat_id, %label, turn_index);

        let history_prompt = render_history(&history);
        let response = if label == ScenarioLabel::Conversation {
            let state = history
                .iter()
                .rev()
                .find_map(|turn| turn.extra_state.clone())
                .unwrap_or_default();
            let context = ConversationContext {
                turn_index,
                history_prompt,
                user_message: preprocessed,
                state,
            };
            normalize(self.conversation.run(&context, meter).await?)
        } else {
            let hint = self.similarity_hint(&preprocessed).await;
            let prompt = format!("{history_prompt}Input: {preprocessed}{hint}");
            let mut response = normalize(self.runner.run(label, &prompt, meter).await?);
            // Single-shot scenarios close the exchange whatever the model
            // claimed.
            response.finished = true;
            response
        };

        self.persist_turn(&base_id, turn_index, message, None, &response).await?;
        Ok(response)
    }

    /// Image requests bypass classification and history entirely: route
    /// between topic identification and catalog search, answer, done.
    async fn handle_image(
        &self,
        chat_id: &str,
        message: &str,
        image_data_uri: &str,
        meter: &UsageMeter,
    ) -> Result<NormalizedResponse, AgentError> {
        let route = self.image_router.classify(message, meter).await?;
        tracing::info!(event_name = "image_route", chat_id, label = %route);
        let reply = self.image_agent.run(message, image_data_uri, meter).await?;

        let response = match route {
            ScenarioLabel::ImageSearch => {
                let base_key = self.best_image_match(&reply).await?;
                normalize(AgentOutcome::Shopping {
                    message: None,
                    base_random_keys: Some(vec![base_key]),
                    member_random_keys: None,
                    finished: true,
                })
            }
            _ => normalize(AgentOutcome::Image { main_topic: reply.main_topic }),
        };

        let (base_id, turn_index) =
            self.conversations.resolve_identity(chat_id).await.map_err(repo_error)?;
        self.persist_turn(&base_id, turn_index, message, Some(image_data_uri), &response)
            .await?;
        Ok(response)
    }

    /// Fan the captions out as retrieval queries. A strong-band hit wins
    /// outright; a mid-band hit counts only when a second caption query
    /// lands on the same base product.
    async fn best_image_match(&self, reply: &ImageReply) -> Result<String, AgentError> {
        let mut queries: Vec<&str> = Vec::new();
        queries.extend(reply.description.as_deref());
        queries.extend(reply.long_description.as_deref());
        if let Some(candidates) = &reply.candidates {
            queries.extend(candidates.iter().map(String::as_str));
        }

        let mut best_strong: Option<ProductHit> = None;
        let mut plausible: HashMap<String, (usize, f64)> = HashMap::new();
        for query in queries.into_iter().take(IMAGE_QUERY_FANOUT) {
            let hits =
                search_with_escalation(self.similarity.as_ref(), &self.policy, query).await?;
            for hit in hits {
                match self.policy.assess(hit.similarity) {
                    MatchStrength::Strong => {
                        if best_strong
                            .as_ref()
                            .map(|b| hit.similarity > b.similarity)
                            .unwrap_or(true)
                        {
                            best_strong = Some(hit);
                        }
                    }
                    MatchStrength::Plausible => {
                        let entry = plausible.entry(hit.base_random_key).or_insert((0, 0.0));
                        entry.0 += 1;
                        if hit.similarity > entry.1 {
                            entry.1 = hit.similarity;
                        }
                    }
                    MatchStrength::Noise => {}
                }
            }
        }

        if let Some(hit) = best_strong {
            return Ok(hit.base_random_key);
        }
        let corroborated = plausible
            .into_iter()
            .filter(|(_, (count, _))| *count >= 2)
            .max_by(|a, b| {
                a.1 .1.partial_cmp(&b.1 .1).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, _)| key);
        corroborated.ok_or_else(|| {
            AgentError::ResolutionFailure(
                "image search found no corroborated catalog match".to_string(),
            )
        })
    }

    /// Opening-message retrieval hint. Only results whose top score clears
    /// the hint gate are worth the prompt space.
    async fn similarity_hint(&self, query: &str) -> String {
        let hits = match self.similarity.search(query, DEFAULT_TOP_K, DEFAULT_PROBES).await {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(event_name = "similarity_hint_failed", error = %error);
                return String::new();
            }
        };
        let worthy = hits
            .first()
            .map(|hit| self.policy.is_hint_worthy(hit.similarity))
            .unwrap_or(false);
        if !worthy {
            return String::new();
        }

        let mut hint =
            String::from("\n\nThe initial similarity search results are provided for convenience.\n");
        for hit in &hits {
            hint.push_str(&format!(
                "{} -> {} -> similarity: {:.4}\n",
                hit.base_random_key, hit.persian_name, hit.similarity
            ));
        }
        hint
    }

    async fn persist_turn(
        &self,
        base_id: &str,
        turn_index: u8,
        user_message: &str,
        user_image: Option<&str>,
        response: &NormalizedResponse,
    ) -> Result<(), AgentError> {
        let turn = ConversationTurn {
            base_id: base_id.to_string(),
            turn_index,
            user_message: user_message.to_string(),
            user_image: user_image.map(str::to_string),
            response_message: response.message.clone(),
            response_base_key: response
                .base_random_keys
                .as_ref()
                .and_then(|keys| keys.first().cloned()),
            response_member_key: response
                .member_random_keys
                .as_ref()
                .and_then(|keys| keys.first().cloned()),
            finished: response.finished,
            extra_state: response.extra_info.clone(),
            created_at: Utc::now(),
        };
        turn.validate().map_err(AgentError::Validation)?;
        self.conversations.append_turn(turn).await.map_err(repo_error)
    }
}

/// Replay prior turns in the numbered transcript shape the prompts expect.
fn render_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut rendered = String::from("Conversation history:\n");
    for (index, turn) in history.iter().enumerate() {
        rendered.push_str(&format!(
            "Input No.{}: {}\n",
            index + 1,
            turn.user_message
        ));
        rendered.push_str(&format!(
            "Response No.{}: {}\n",
            index + 1,
            turn.response_message.as_deref().unwrap_or("-")
        ));
    }
    rendered.push('\n');
    rendered
}
