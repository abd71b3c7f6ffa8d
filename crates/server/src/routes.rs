//! The single outward endpoint: `POST /chat`. Deterministic probe messages
//! are answered before any model work; everything else flows through the
//! orchestrator and leaves as the three-field wire shape.

use std::sync::{Arc, OnceLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use regex::Regex;
use serde::{Deserialize, Serialize};

use dastyar_agent::scenarios::image::parse_data_uri;
use dastyar_agent::{HybridOrchestrator, SimilarityResolver};
use dastyar_core::domain::response::WireResponse;
use dastyar_core::errors::InterfaceError;
use dastyar_core::NormalizedResponse;
use dastyar_db::repositories::RequestLogRepository;
use dastyar_db::DbPool;

/// Debug chat identities get raw retrieval output instead of an agent run.
const RETRIEVE_SIMILAR_PREFIX: &str = "retrieve_similar";
const DEBUG_TOP_K: usize = 5;
const DEBUG_PROBES: u32 = 10;

fn base_key_probe() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)return base random key:\s*([A-Za-z0-9\-_:]+)").unwrap()
    })
}

fn member_key_probe() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)return member random key:\s*([A-Za-z0-9\-_:]+)").unwrap()
    })
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<HybridOrchestrator>,
    pub similarity: Arc<dyn SimilarityResolver>,
    pub request_log: Arc<dyn RequestLogRepository>,
    pub db_pool: DbPool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub chat_id: String,
    pub messages: Vec<ChatMessagePart>,
}

impl ChatRequestBody {
    /// Only the first text part and the first image part count; extra parts
    /// are ignored rather than rejected.
    fn first_text(&self) -> &str {
        self.messages
            .iter()
            .find(|part| part.kind == "text")
            .map(|part| part.content.as_str())
            .unwrap_or("")
    }

    fn first_image(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|part| part.kind == "image")
            .map(|part| part.content.as_str())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .with_state(state.clone())
        .merge(crate::health::router(state.db_pool))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequestBody>,
) -> (StatusCode, Json<WireResponse>) {
    let (status, response) = dispatch(&state, &body).await;
    let response = WireResponse::from(response);

    let request_json = serde_json::to_value(&body).unwrap_or_default();
    let response_json = serde_json::to_value(&response).unwrap_or_default();
    if let Err(error) = state.request_log.insert(&body.chat_id, &request_json, &response_json).await
    {
        tracing::warn!(event_name = "request_log_failed", chat_id = %body.chat_id, error = %error);
    }

    (status, Json(response))
}

async fn dispatch(state: &AppState, body: &ChatRequestBody) -> (StatusCode, NormalizedResponse) {
    let text = body.first_text();
    let image = body.first_image();

    match image {
        None => {
            if let Some(probe) = probe_response(text) {
                return (StatusCode::OK, probe);
            }
            if body.chat_id.starts_with(RETRIEVE_SIMILAR_PREFIX) {
                return (StatusCode::OK, retrieve_similar(state, text).await);
            }
        }
        Some(uri) => {
            // A payload that is not even a decodable image is the caller's
            // fault; flag it before any model work.
            if let Err(error) = parse_data_uri(uri) {
                let rejection = InterfaceError::BadRequest {
                    message: error.to_string(),
                    chat_id: body.chat_id.clone(),
                };
                tracing::warn!(event_name = "request_rejected", chat_id = %body.chat_id, error = %rejection);
                return (StatusCode::BAD_REQUEST, NormalizedResponse::error(rejection));
            }
        }
    }

    (StatusCode::OK, state.orchestrator.handle(&body.chat_id, text, image).await)
}

/// Health-check and echo probes used by the surrounding platform. They must
/// answer deterministically, without touching a model or the database.
fn probe_response(text: &str) -> Option<NormalizedResponse> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("ping") {
        return Some(NormalizedResponse::message_only("pong", true));
    }
    if let Some(captures) = base_key_probe().captures(trimmed) {
        let echoed = NormalizedResponse::new(None, Some(vec![captures[1].to_string()]), None, true);
        return Some(echoed.unwrap_or_else(NormalizedResponse::error));
    }
    if let Some(captures) = member_key_probe().captures(trimmed) {
        let echoed = NormalizedResponse::new(None, None, Some(vec![captures[1].to_string()]), true);
        return Some(echoed.unwrap_or_else(NormalizedResponse::error));
    }
    None
}

/// Raw similarity output for retrieval debugging: every hit's name and
/// score in the message, every base key in the key list. The single-key
/// rule deliberately does not apply here.
async fn retrieve_similar(state: &AppState, query: &str) -> NormalizedResponse {
    let hits = match state.similarity.search(query, DEBUG_TOP_K, DEBUG_PROBES).await {
        Ok(hits) => hits,
        Err(error) => return NormalizedResponse::error(error),
    };

    let message = hits
        .iter()
        .map(|hit| format!("{} -> similarity: {:.4}", hit.persian_name, hit.similarity))
        .collect::<Vec<_>>()
        .join("\n");
    let keys: Vec<String> = hits.into_iter().map(|hit| hit.base_random_key).collect();

    NormalizedResponse {
        message: Some(message),
        base_random_keys: Some(keys),
        member_random_keys: None,
        finished: true,
        extra_info: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::Json;

    use dastyar_agent::llm::{ChatOutcome, ChatRequest, LlmClient};
    use dastyar_agent::scenarios::conversation::ConversationAgent;
    use dastyar_agent::scenarios::image::ImageAgent;
    use dastyar_agent::{
        HybridOrchestrator, ImageRouteClassifier, IntentClassifier, ScenarioRunner, ScorePolicy,
        SimilarityResolver, ToolRegistry, UsageBudget,
    };
    use dastyar_core::errors::AgentError;
    use dastyar_core::ProductHit;
    use dastyar_db::repositories::{
        CandidateFilter, CatalogRepository, InMemoryConversationRepository,
        InMemoryRequestLogRepository, RepositoryError,
    };
    use dastyar_db::{connect_with_settings, migrations};

    use super::{chat, probe_response, AppState, ChatMessagePart, ChatRequestBody};

    struct UnreachableLlm;

    #[async_trait]
    impl LlmClient for UnreachableLlm {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutcome, AgentError> {
            Err(AgentError::collaborator("llm", "no model backend in this test"))
        }
    }

    struct FixedSimilarity;

    #[async_trait]
    impl SimilarityResolver for FixedSimilarity {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _probes: u32,
        ) -> Result<Vec<ProductHit>, AgentError> {
            Ok(vec![
                ProductHit {
                    base_random_key: "base-1".to_string(),
                    persian_name: "میز تحریر".to_string(),
                    similarity: 0.91,
                },
                ProductHit {
                    base_random_key: "base-2".to_string(),
                    persian_name: "میز ناهارخوری".to_string(),
                    similarity: 0.64,
                },
            ])
        }
    }

    struct EmptyCatalog;

    #[async_trait]
    impl CatalogRepository for EmptyCatalog {
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
            _query: &str,
        ) -> Result<Vec<serde_json::Value>, RepositoryError> {
            Ok(vec![])
        }
    }

    async fn state(request_log: Arc<InMemoryRequestLogRepository>) -> AppState {
        let llm: Arc<dyn LlmClient> = Arc::new(UnreachableLlm);
        let registry = Arc::new(ToolRegistry::default());
        let similarity: Arc<dyn SimilarityResolver> = Arc::new(FixedSimilarity);
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        AppState {
            orchestrator: Arc::new(HybridOrchestrator {
                conversations: Arc::new(InMemoryConversationRepository::default()),
                classifier: IntentClassifier::new(llm.clone(), "m"),
                image_router: ImageRouteClassifier::new(llm.clone(), "m"),
                image_agent: ImageAgent::new(llm.clone(), "m"),
                runner: ScenarioRunner::new(llm.clone(), registry.clone(), registry.clone(), "m"),
                conversation: ConversationAgent::new(llm, registry, Arc::new(EmptyCatalog), "m"),
                similarity: similarity.clone(),
                policy: ScorePolicy::default(),
                budget: UsageBudget {
                    request_limit: 30,
                    tool_call_limit: 30,
                    output_token_limit: 4096,
                },
            }),
            similarity,
            request_log,
            db_pool: pool,
        }
    }

    fn text_body(chat_id: &str, content: &str) -> ChatRequestBody {
        ChatRequestBody {
            chat_id: chat_id.to_string(),
            messages: vec![ChatMessagePart {
                kind: "text".to_string(),
                content: content.to_string(),
            }],
        }
    }

    #[test]
    fn probes_answer_without_any_backend() {
        let pong = probe_response("ping").expect("pong");
        assert_eq!(pong.message.as_deref(), Some("pong"));

        let base = probe_response("return base random key: abc-123").expect("base probe");
        assert_eq!(base.base_random_keys, Some(vec!["abc-123".to_string()]));

        let member = probe_response("Return Member Random Key: m_9").expect("member probe");
        assert_eq!(member.member_random_keys, Some(vec!["m_9".to_string()]));

        assert!(probe_response("یک میز میخوام").is_none());
    }

    #[tokio::test]
    async fn ping_round_trips_and_is_logged() {
        let request_log = Arc::new(InMemoryRequestLogRepository::default());
        let state = state(request_log.clone()).await;

        let (status, Json(response)) =
            chat(State(state), Json(text_body("chat-ping", "ping"))).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(response.message.as_deref(), Some("pong"));
        assert!(response.base_random_keys.is_none());

        let entries = request_log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "chat-ping");
        assert_eq!(entries[0].2["message"], "pong");
    }

    #[tokio::test]
    async fn retrieve_similar_chat_ids_expose_raw_retrieval() {
        let request_log = Arc::new(InMemoryRequestLogRepository::default());
        let state = state(request_log).await;

        let (_, Json(response)) =
            chat(State(state), Json(text_body("retrieve_similar_debug", "میز"))).await;
        let message = response.message.expect("message");
        assert!(message.contains("میز تحریر -> similarity: 0.9100"));
        assert!(message.contains("میز ناهارخوری -> similarity: 0.6400"));
        assert_eq!(
            response.base_random_keys,
            Some(vec!["base-1".to_string(), "base-2".to_string()])
        );
    }

    #[tokio::test]
    async fn backend_failures_surface_as_the_error_message_shape() {
        let request_log = Arc::new(InMemoryRequestLogRepository::default());
        let state = state(request_log).await;

        let (status, Json(response)) =
            chat(State(state), Json(text_body("chat-broken", "یک میز میخوام"))).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert!(response.message.expect("message").starts_with("-- ERROR:"));
        assert!(response.base_random_keys.is_none());
    }

    #[tokio::test]
    async fn malformed_image_payloads_are_rejected_with_bad_request() {
        let request_log = Arc::new(InMemoryRequestLogRepository::default());
        let state = state(request_log).await;

        let body = ChatRequestBody {
            chat_id: "chat-image".to_string(),
            messages: vec![ChatMessagePart {
                kind: "image".to_string(),
                content: "data:text/plain,not-an-image".to_string(),
            }],
        };
        let (status, Json(response)) = chat(State(state), Json(body)).await;
        assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
        let message = response.message.expect("message");
        assert!(message.starts_with("-- ERROR: bad request:"));
    }
}
