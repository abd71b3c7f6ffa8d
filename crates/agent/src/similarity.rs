//! Semantic product lookup: embed the query, rank catalog vectors by cosine
//! similarity, and grade the result against the score policy.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use dastyar_core::config::{EmbeddingConfig, LlmConfig};
use dastyar_core::errors::AgentError;
use dastyar_core::ProductHit;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_PROBES: u32 = 20;

/// How strong a similarity score is, per the fixed policy bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStrength {
    Strong,
    Plausible,
    Noise,
}

/// Score bands used everywhere a similarity result is judged. `hint_gate`
/// guards whether first-turn candidates are worth injecting into the prompt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScorePolicy {
    pub strong: f64,
    pub noise: f64,
    pub hint_gate: f64,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self { strong: 0.8, noise: 0.4, hint_gate: 0.7 }
    }
}

impl ScorePolicy {
    pub fn assess(&self, similarity: f64) -> MatchStrength {
        if similarity >= self.strong {
            MatchStrength::Strong
        } else if similarity <= self.noise {
            MatchStrength::Noise
        } else {
            MatchStrength::Plausible
        }
    }

    /// Whether a top-ranked hit justifies seeding the prompt with the
    /// candidate list.
    pub fn is_hint_worthy(&self, top_similarity: f64) -> bool {
        top_similarity > self.hint_gate
    }
}

#[async_trait]
pub trait SimilarityResolver: Send + Sync {
    /// Top-k nearest products for a query, highest similarity first.
    /// `probes` is a recall knob for index-backed stores; exhaustive stores
    /// may ignore it.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        probes: u32,
    ) -> Result<Vec<ProductHit>, AgentError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(llm: &LlmConfig, embedding: &EmbeddingConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(embedding.timeout_secs))
            .build()
            .map_err(|e| AgentError::collaborator("embedding", e.to_string()))?;
        Ok(Self {
            http,
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            api_key: llm.api_key.clone(),
            model: embedding.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut builder =
            self.http.post(&url).json(&json!({"model": self.model, "input": text}));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::collaborator("embedding", e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(AgentError::collaborator(
                "embedding",
                format!("embedding request failed with {status}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::collaborator("embedding", e.to_string()))?;
        let vector = body
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::collaborator("embedding", "response carried no vector"))?;
        vector
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| AgentError::collaborator("embedding", "non-numeric component"))
            })
            .collect()
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        probes: u32,
    ) -> Result<Vec<ProductHit>, AgentError>;
}

/// Exhaustive cosine scan over vectors held in memory. Suitable for the
/// catalog sizes this deployment carries; swap the trait impl for an
/// index-backed store when the catalog outgrows it.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: Vec<VectorEntry>,
}

struct VectorEntry {
    random_key: String,
    persian_name: String,
    embedding: Vec<f32>,
}

impl InMemoryVectorStore {
    pub fn insert(&mut self, random_key: impl Into<String>, persian_name: impl Into<String>, embedding: Vec<f32>) {
        self.entries.push(VectorEntry {
            random_key: random_key.into(),
            persian_name: persian_name.into(),
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        _probes: u32,
    ) -> Result<Vec<ProductHit>, AgentError> {
        let mut hits: Vec<ProductHit> = self
            .entries
            .iter()
            .map(|entry| ProductHit {
                base_random_key: entry.random_key.clone(),
                persian_name: entry.persian_name.clone(),
                similarity: cosine_similarity(embedding, &entry.embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

pub struct EmbeddingSimilarityResolver<E, S> {
    embedder: E,
    store: S,
}

impl<E, S> EmbeddingSimilarityResolver<E, S> {
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl<E: EmbeddingClient, S: VectorStore> SimilarityResolver for EmbeddingSimilarityResolver<E, S> {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        probes: u32,
    ) -> Result<Vec<ProductHit>, AgentError> {
        let embedding = self.embedder.embed(query).await?;
        self.store.nearest(&embedding, top_k, probes).await
    }
}

/// Search and, when nothing clears the noise band, retry once with widened
/// recall parameters before settling for the best effort.
pub async fn search_with_escalation(
    resolver: &dyn SimilarityResolver,
    policy: &ScorePolicy,
    query: &str,
) -> Result<Vec<ProductHit>, AgentError> {
    let first = resolver.search(query, DEFAULT_TOP_K, DEFAULT_PROBES).await?;
    let usable = first
        .first()
        .map(|hit| policy.assess(hit.similarity) != MatchStrength::Noise)
        .unwrap_or(false);
    if usable {
        return Ok(first);
    }

    tracing::debug!(event_name = "similarity_escalation", query, "widening recall parameters");
    let second = resolver.search(query, DEFAULT_TOP_K * 2, DEFAULT_PROBES * 2).await?;
    if second.is_empty() {
        Ok(first)
    } else {
        Ok(second)
    }
}
