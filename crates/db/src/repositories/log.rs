use async_trait::async_trait;
use chrono::Utc;

use super::{RepositoryError, RequestLogRepository};
use crate::DbPool;

pub struct SqlRequestLogRepository {
    pool: DbPool,
}

impl SqlRequestLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestLogRepository for SqlRequestLogRepository {
    async fn insert(
        &self,
        chat_id: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO request_log (chat_id, request_json, response_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(request.to_string())
        .bind(response.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqlRequestLogRepository;
    use crate::repositories::RequestLogRepository;
    use crate::{connect_with_settings, migrations};
    use sqlx::Row;

    #[tokio::test]
    async fn insert_records_serialized_exchange() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let repo = SqlRequestLogRepository::new(pool.clone());

        let request = serde_json::json!({"chat_id": "c-1", "messages": [{"type": "text", "content": "سلام"}]});
        let response = serde_json::json!({"message": "سلام!", "base_random_keys": null});
        repo.insert("c-1", &request, &response).await.expect("insert");

        let row = sqlx::query("SELECT chat_id, request_json, response_json FROM request_log")
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert_eq!(row.get::<String, _>("chat_id"), "c-1");
        let stored: serde_json::Value =
            serde_json::from_str(&row.get::<String, _>("request_json")).expect("json");
        assert_eq!(stored["chat_id"], "c-1");
        let stored_response: serde_json::Value =
            serde_json::from_str(&row.get::<String, _>("response_json")).expect("json");
        assert_eq!(stored_response["message"], "سلام!");
    }
}
