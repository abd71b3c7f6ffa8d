use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use dastyar_core::domain::conversation::{ConversationTurn, ExtraInfoConversation, MAX_TURNS};

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn latest_turn(
        &self,
        base_id: &str,
    ) -> Result<Option<(u8, bool)>, RepositoryError> {
        let row = sqlx::query(
            "SELECT turn_index, finished FROM conversation_turn
             WHERE base_id = ? ORDER BY turn_index DESC LIMIT 1",
        )
        .bind(base_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let index: i64 = r.get("turn_index");
            let finished: i64 = r.get("finished");
            (index as u8, finished != 0)
        }))
    }

    async fn commit_session(&self, chat_id: &str, base_id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_session (chat_id, base_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                 base_id = excluded.base_id,
                 updated_at = excluded.updated_at",
        )
        .bind(chat_id)
        .bind(base_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let base_id: String =
        row.try_get("base_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let turn_index: i64 =
        row.try_get("turn_index").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_message: String =
        row.try_get("user_message").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_image: Option<String> =
        row.try_get("user_image").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let response_message: Option<String> =
        row.try_get("response_message").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let response_base_key: Option<String> =
        row.try_get("response_base_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let response_member_key: Option<String> =
        row.try_get("response_member_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let finished: i64 =
        row.try_get("finished").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let extra_state_raw: Option<String> =
        row.try_get("extra_state").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_raw: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let extra_state = match extra_state_raw {
        Some(raw) => Some(
            serde_json::from_str::<ExtraInfoConversation>(&raw)
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        ),
        None => None,
    };
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(ConversationTurn {
        base_id,
        turn_index: turn_index as u8,
        user_message,
        user_image,
        response_message,
        response_base_key,
        response_member_key,
        finished: finished != 0,
        extra_state,
        created_at,
    })
}

#[async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn resolve_identity(&self, chat_id: &str) -> Result<(String, u8), RepositoryError> {
        let session = sqlx::query("SELECT base_id FROM chat_session WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = session {
            let base_id: String = row.get("base_id");
            match self.latest_turn(&base_id).await? {
                Some((index, finished)) if !finished && index < MAX_TURNS => {
                    return Ok((base_id, index + 1));
                }
                None => return Ok((base_id, 1)),
                // Finished (or exhausted) conversation: fall through and
                // start a fresh identity below.
                Some(_) => {}
            }
        }

        let base_id = Uuid::new_v4().to_string();
        self.commit_session(chat_id, &base_id).await?;
        Ok((base_id, 1))
    }

    async fn recent_turns(
        &self,
        base_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT base_id, turn_index, user_message, user_image, response_message,
                    response_base_key, response_member_key, finished, extra_state, created_at
             FROM conversation_turn
             WHERE base_id = ?
             ORDER BY turn_index DESC
             LIMIT ?",
        )
        .bind(base_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns =
            rows.iter().map(row_to_turn).collect::<Result<Vec<_>, RepositoryError>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn append_turn(&self, turn: ConversationTurn) -> Result<(), RepositoryError> {
        turn.validate().map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let extra_state = match &turn.extra_state {
            Some(state) => Some(
                serde_json::to_string(state)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
            ),
            None => None,
        };

        sqlx::query(
            "INSERT INTO conversation_turn (base_id, turn_index, user_message, user_image,
                                            response_message, response_base_key,
                                            response_member_key, finished, extra_state, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.base_id)
        .bind(turn.turn_index as i64)
        .bind(&turn.user_message)
        .bind(&turn.user_image)
        .bind(&turn.response_message)
        .bind(&turn.response_base_key)
        .bind(&turn.response_member_key)
        .bind(turn.finished as i64)
        .bind(&extra_state)
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use dastyar_core::domain::conversation::{Constraint, ConversationTurn, ExtraInfoConversation};

    use super::SqlConversationRepository;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlConversationRepository {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlConversationRepository::new(pool)
    }

    fn turn(base_id: &str, index: u8, finished: bool) -> ConversationTurn {
        ConversationTurn {
            base_id: base_id.to_string(),
            turn_index: index,
            user_message: format!("پیام {index}"),
            user_image: None,
            response_message: Some(format!("پاسخ {index}")),
            response_base_key: None,
            response_member_key: finished.then(|| "member-1".to_string()),
            finished,
            extra_state: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fresh_chat_id_gets_a_new_identity_at_turn_one() {
        let repo = repo().await;
        let (base_id, index) = repo.resolve_identity("chat-1").await.expect("resolve");
        assert_eq!(index, 1);
        assert!(!base_id.is_empty());

        // Committed: the same chat id resolves to the same identity.
        let (again, index_again) = repo.resolve_identity("chat-1").await.expect("resolve again");
        assert_eq!(again, base_id);
        assert_eq!(index_again, 1);
    }

    #[tokio::test]
    async fn turn_index_increments_until_finished_then_resets() {
        let repo = repo().await;
        let (base_id, _) = repo.resolve_identity("chat-2").await.expect("resolve");

        repo.append_turn(turn(&base_id, 1, false)).await.expect("append 1");
        let (same, index) = repo.resolve_identity("chat-2").await.expect("resolve after 1");
        assert_eq!(same, base_id);
        assert_eq!(index, 2);

        repo.append_turn(turn(&base_id, 2, true)).await.expect("append finished");
        let (fresh, index) = repo.resolve_identity("chat-2").await.expect("resolve after end");
        assert_ne!(fresh, base_id);
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn exhausted_conversations_reset_even_without_finished_flag() {
        let repo = repo().await;
        let (base_id, _) = repo.resolve_identity("chat-3").await.expect("resolve");
        for index in 1..=5 {
            repo.append_turn(turn(&base_id, index, false)).await.expect("append");
        }

        let (fresh, index) = repo.resolve_identity("chat-3").await.expect("resolve");
        assert_ne!(fresh, base_id);
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn recent_turns_returns_oldest_first_and_honors_limit() {
        let repo = repo().await;
        for index in 1..=5 {
            repo.append_turn(turn("base-x", index, false)).await.expect("append");
        }

        let turns = repo.recent_turns("base-x", 4).await.expect("recent");
        assert_eq!(turns.len(), 4);
        assert_eq!(turns.first().map(|t| t.turn_index), Some(2));
        assert_eq!(turns.last().map(|t| t.turn_index), Some(5));
    }

    #[tokio::test]
    async fn extra_state_round_trips_through_storage() {
        let repo = repo().await;
        let mut stored = turn("base-y", 1, false);
        stored.extra_state = Some(ExtraInfoConversation {
            city_name: Constraint::Value("تهران".to_string()),
            has_warranty: Constraint::Ignore,
            ..ExtraInfoConversation::default()
        });
        repo.append_turn(stored.clone()).await.expect("append");

        let turns = repo.recent_turns("base-y", 4).await.expect("recent");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].extra_state, stored.extra_state);
    }

    #[tokio::test]
    async fn out_of_range_turn_index_is_rejected() {
        let repo = repo().await;
        let bad = turn("base-z", 6, false);
        assert!(repo.append_turn(bad).await.is_err());
    }
}
