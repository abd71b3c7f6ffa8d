use async_trait::async_trait;
use thiserror::Error;

use dastyar_core::domain::catalog::CandidateShop;
use dastyar_core::domain::conversation::ConversationTurn;

pub mod catalog;
pub mod conversation;
pub mod log;
pub mod memory;

pub use catalog::SqlCatalogRepository;
pub use conversation::SqlConversationRepository;
pub use log::SqlRequestLogRepository;
pub use memory::{InMemoryConversationRepository, InMemoryRequestLogRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("rejected query: {0}")]
    RejectedQuery(String),
}

/// Constraint filter applied to the candidate lookup. Name and brand filters
/// are substring matches; user-supplied Persian names are frequently partial
/// or variant-spelled, so equality would silently miss rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateFilter {
    pub base_random_keys: Vec<String>,
    pub product_name_like: Option<String>,
    pub city_name: Option<String>,
    pub has_warranty: Option<bool>,
    pub min_score: Option<f64>,
    pub brand_title_like: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

/// Conversation-state contract exposed to the orchestrator.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Resolve a chat identity to its conversation identity and the current
    /// 1-based turn index. Creates a fresh base identity whenever no prior
    /// turn exists or the most recent turn was finished, and commits the
    /// decision so subsequent calls observe it.
    async fn resolve_identity(&self, chat_id: &str) -> Result<(String, u8), RepositoryError>;

    /// Most recent turns for a conversation identity, oldest first.
    async fn recent_turns(
        &self,
        base_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;

    async fn append_turn(&self, turn: ConversationTurn) -> Result<(), RepositoryError>;
}

/// Read-only catalog lookups backing the candidate search and the SQL
/// resolver's execute entry point.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn product_name(&self, random_key: &str) -> Result<Option<String>, RepositoryError>;

    async fn candidates_for(
        &self,
        filter: &CandidateFilter,
        limit: u32,
    ) -> Result<Vec<CandidateShop>, RepositoryError>;

    /// Execute a read query, returning rows as JSON objects. Anything that
    /// is not a single SELECT statement is rejected.
    async fn execute_select(
        &self,
        query: &str,
    ) -> Result<Vec<serde_json::Value>, RepositoryError>;
}

#[async_trait]
pub trait RequestLogRepository: Send + Sync {
    async fn insert(
        &self,
        chat_id: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<(), RepositoryError>;
}
