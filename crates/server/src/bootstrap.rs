use std::sync::Arc;

use dastyar_agent::llm::LlmClient;
use dastyar_agent::scenarios::conversation::ConversationAgent;
use dastyar_agent::scenarios::image::ImageAgent;
use dastyar_agent::{
    EmbeddingSimilarityResolver, ExecuteSqlTool, HybridOrchestrator, ImageRouteClassifier,
    InMemoryVectorStore, IntentClassifier, OpenAiChatClient, OpenAiEmbeddingClient,
    ScenarioRunner, ScorePolicy, SimilarityResolver, SimilaritySearchTool, ToolRegistry,
    UsageBudget,
};
use dastyar_core::config::{AppConfig, ConfigError, LoadOptions};
use dastyar_core::errors::AgentError;
use dastyar_db::repositories::{
    CatalogRepository, RequestLogRepository, SqlCatalogRepository, SqlConversationRepository,
    SqlRequestLogRepository,
};
use dastyar_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model backend setup failed: {0}")]
    Agent(#[source] AgentError),
    #[error("embedding warmup failed: {0}")]
    EmbeddingWarmup(#[source] AgentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap_start", "starting application bootstrap");
    let config = AppConfig::load(options)?;

    let db_pool =
        connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "migrations_applied", "database migrations applied");

    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let catalog: Arc<dyn CatalogRepository> =
        Arc::new(SqlCatalogRepository::new(db_pool.clone()));
    let request_log: Arc<dyn RequestLogRepository> =
        Arc::new(SqlRequestLogRepository::new(db_pool.clone()));

    let llm: Arc<dyn LlmClient> =
        Arc::new(OpenAiChatClient::new(&config.llm).map_err(BootstrapError::Agent)?);
    let embedder = OpenAiEmbeddingClient::new(&config.llm, &config.embedding)
        .map_err(BootstrapError::Agent)?;
    let store = warm_vector_store(&embedder, catalog.as_ref()).await?;
    let similarity: Arc<dyn SimilarityResolver> =
        Arc::new(EmbeddingSimilarityResolver::new(embedder, store));

    let search_tool = Arc::new(SimilaritySearchTool::new(similarity.clone()));
    let sql_tool = Arc::new(ExecuteSqlTool::new(catalog.clone()));

    let mut registry = ToolRegistry::default();
    registry.register(search_tool.clone());
    registry.register(sql_tool);
    let registry = Arc::new(registry);

    let mut search_registry = ToolRegistry::default();
    search_registry.register(search_tool);
    let search_registry = Arc::new(search_registry);

    let orchestrator = HybridOrchestrator {
        conversations: conversations.clone(),
        classifier: IntentClassifier::new(llm.clone(), config.llm.classifier_model.clone()),
        image_router: ImageRouteClassifier::new(llm.clone(), config.llm.classifier_model.clone()),
        image_agent: ImageAgent::new(llm.clone(), config.llm.image_model.clone()),
        runner: ScenarioRunner::new(
            llm.clone(),
            registry.clone(),
            search_registry,
            config.llm.shopping_model.clone(),
        ),
        conversation: ConversationAgent::new(
            llm,
            registry,
            catalog,
            config.llm.shopping_model.clone(),
        ),
        similarity: similarity.clone(),
        policy: ScorePolicy::default(),
        budget: UsageBudget::from(&config.budget),
    };

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        similarity,
        request_log,
        db_pool: db_pool.clone(),
    };

    Ok(Application { config, db_pool, state })
}

/// Embed every catalog product name into the in-process vector store. An
/// empty catalog is fine; the retrieval hint simply never fires.
async fn warm_vector_store(
    embedder: &OpenAiEmbeddingClient,
    catalog: &dyn CatalogRepository,
) -> Result<InMemoryVectorStore, BootstrapError> {
    use dastyar_agent::similarity::EmbeddingClient;

    let rows = catalog
        .execute_select("SELECT random_key, persian_name FROM base_products")
        .await
        .map_err(|e| BootstrapError::Agent(AgentError::collaborator("database", e.to_string())))?;

    let mut store = InMemoryVectorStore::default();
    for row in &rows {
        let (Some(key), Some(name)) = (
            row.get("random_key").and_then(serde_json::Value::as_str),
            row.get("persian_name").and_then(serde_json::Value::as_str),
        ) else {
            continue;
        };
        let embedding =
            embedder.embed(name).await.map_err(BootstrapError::EmbeddingWarmup)?;
        store.insert(key, name, embedding);
    }
    info!(event_name = "vector_store_warmed", products = store.len());
    Ok(store)
}
