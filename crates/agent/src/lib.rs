//! Model-facing half of the Dastyar shopping assistant: the OpenAI-style
//! chat client, intent classification, the scenario agents and their tool
//! loop, similarity retrieval, SQL generation, and the orchestrator that
//! ties one inbound chat request together.
//!
//! Storage lives in `dastyar-db`; everything here reaches it through the
//! repository traits so tests can run against in-memory substitutes.

pub mod budget;
pub mod classifier;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;
pub mod scenarios;
pub mod similarity;
pub mod sqlgen;
pub mod tools;

pub use budget::{UsageBudget, UsageMeter};
pub use classifier::{ImageRouteClassifier, IntentClassifier};
pub use llm::{LlmClient, OpenAiChatClient};
pub use normalize::normalize;
pub use orchestrator::HybridOrchestrator;
pub use scenarios::{AgentOutcome, ScenarioRunner};
pub use similarity::{
    EmbeddingSimilarityResolver, InMemoryVectorStore, OpenAiEmbeddingClient, ScorePolicy,
    SimilarityResolver,
};
pub use sqlgen::SqlResolver;
pub use tools::{ExecuteSqlTool, SimilaritySearchTool, ToolRegistry};
