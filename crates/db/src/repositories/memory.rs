use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use dastyar_core::domain::conversation::{ConversationTurn, MAX_TURNS};

use super::{ConversationRepository, RepositoryError, RequestLogRepository};

/// Conversation store backed by process memory. Used by agent tests that
/// exercise the turn protocol without a database.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    sessions: RwLock<HashMap<String, String>>,
    turns: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn resolve_identity(&self, chat_id: &str) -> Result<(String, u8), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let turns = self.turns.read().await;

        if let Some(base_id) = sessions.get(chat_id) {
            let last = turns.get(base_id).and_then(|history| history.last());
            if let Some(turn) = last {
                if !turn.finished && turn.turn_index < MAX_TURNS {
                    return Ok((base_id.clone(), turn.turn_index + 1));
                }
            } else {
                return Ok((base_id.clone(), 1));
            }
        }

        let fresh = Uuid::new_v4().to_string();
        sessions.insert(chat_id.to_string(), fresh.clone());
        Ok((fresh, 1))
    }

    async fn recent_turns(
        &self,
        base_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let turns = self.turns.read().await;
        let history = turns.get(base_id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn append_turn(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        turn.validate()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let mut turns = self.turns.write().await;
        turns.entry(turn.base_id.clone()).or_default().push(turn);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestLogRepository {
    entries: RwLock<Vec<(String, serde_json::Value, serde_json::Value)>>,
}

impl InMemoryRequestLogRepository {
    pub async fn entries(&self) -> Vec<(String, serde_json::Value, serde_json::Value)> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl RequestLogRepository for InMemoryRequestLogRepository {
    async fn insert(
        &self,
        chat_id: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push((chat_id.to_string(), request.clone(), response.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use dastyar_core::domain::conversation::ConversationTurn;

    use crate::repositories::{ConversationRepository, InMemoryConversationRepository};

    fn turn(base_id: &str, index: u8, finished: bool) -> ConversationTurn {
        ConversationTurn {
            base_id: base_id.to_string(),
            turn_index: index,
            user_message: format!("پیام {index}"),
            user_image: None,
            response_message: Some("پاسخ".to_string()),
            response_base_key: None,
            response_member_key: None,
            finished,
            extra_state: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn identity_follows_the_turn_protocol() {
        let repo = InMemoryConversationRepository::default();
        let (base_id, index) = repo.resolve_identity("c-1").await.expect("identity");
        assert_eq!(index, 1);

        repo.append_turn(turn(&base_id, 1, false)).await.expect("append");
        let (same, index) = repo.resolve_identity("c-1").await.expect("identity");
        assert_eq!(same, base_id);
        assert_eq!(index, 2);

        repo.append_turn(turn(&base_id, 2, true)).await.expect("append");
        let (fresh, index) = repo.resolve_identity("c-1").await.expect("identity");
        assert_ne!(fresh, base_id);
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn recent_turns_keep_chronological_order_under_limit() {
        let repo = InMemoryConversationRepository::default();
        for index in 1..=5 {
            repo.append_turn(turn("b-1", index, false)).await.expect("append");
        }
        let history = repo.recent_turns("b-1", 4).await.expect("history");
        let indexes: Vec<u8> = history.iter().map(|t| t.turn_index).collect();
        assert_eq!(indexes, vec![2, 3, 4, 5]);
    }
}
