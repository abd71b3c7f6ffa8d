use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, QueryBuilder, Row};

use dastyar_core::domain::catalog::CandidateShop;

use super::{CandidateFilter, CatalogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_candidate(row: &SqliteRow) -> Result<CandidateShop, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    Ok(CandidateShop {
        base_random_key: row.try_get("base_random_key").map_err(decode)?,
        product_name: row.try_get("product_name").map_err(decode)?,
        shop_id: row.try_get("shop_id").map_err(decode)?,
        price: row.try_get("price").map_err(decode)?,
        city: row.try_get("city").map_err(decode)?,
        has_warranty: row.try_get::<i64, _>("has_warranty").map_err(decode)? != 0,
        score: row.try_get("score").map_err(decode)?,
        extra_features: row.try_get("extra_features").map_err(decode)?,
        member_random_key: row.try_get("member_random_key").map_err(decode)?,
        brand_title: row.try_get("brand_title").map_err(decode)?,
        similarity: None,
    })
}

fn row_to_json(row: &SqliteRow) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let ordinal = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
            v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
            v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
            v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
        } else {
            serde_json::Value::Null
        };
        object.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(object)
}

/// Single read statement, nothing else. The SQL resolver feeds model-written
/// queries through here, so the guard is structural rather than trusting.
fn ensure_select_only(query: &str) -> Result<(), RepositoryError> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(RepositoryError::RejectedQuery("empty query".to_string()));
    }
    let lowered = trimmed.to_ascii_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(RepositoryError::RejectedQuery(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    if trimmed.contains(';') {
        return Err(RepositoryError::RejectedQuery(
            "multiple statements are not allowed".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn product_name(&self, random_key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT persian_name FROM base_products WHERE random_key = ? LIMIT 1",
        )
        .bind(random_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("persian_name")))
    }

    async fn candidates_for(
        &self,
        filter: &CandidateFilter,
        limit: u32,
    ) -> Result<Vec<CandidateShop>, RepositoryError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT bp.random_key AS base_random_key, bp.persian_name AS product_name,
                    bp.extra_features, m.random_key AS member_random_key, m.shop_id, m.price,
                    s.score, s.has_warranty, c.name AS city, b.title AS brand_title
             FROM members m
             JOIN base_products bp ON bp.random_key = m.base_random_key
             JOIN shops s ON s.id = m.shop_id
             LEFT JOIN cities c ON c.id = s.city_id
             LEFT JOIN brands b ON b.id = bp.brand_id
             WHERE 1 = 1",
        );

        if !filter.base_random_keys.is_empty() {
            builder.push(" AND bp.random_key IN (");
            let mut separated = builder.separated(", ");
            for key in &filter.base_random_keys {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");
        }
        if let Some(name) = &filter.product_name_like {
            builder.push(" AND bp.persian_name LIKE ").push_bind(format!("%{name}%"));
        }
        if let Some(city) = &filter.city_name {
            builder.push(" AND c.name LIKE ").push_bind(format!("%{city}%"));
        }
        if let Some(has_warranty) = filter.has_warranty {
            builder.push(" AND s.has_warranty = ").push_bind(has_warranty as i64);
        }
        if let Some(min_score) = filter.min_score {
            builder.push(" AND s.score >= ").push_bind(min_score);
        }
        if let Some(brand) = &filter.brand_title_like {
            builder.push(" AND b.title LIKE ").push_bind(format!("%{brand}%"));
        }
        if let Some(min_price) = filter.min_price {
            builder.push(" AND m.price >= ").push_bind(min_price);
        }
        if let Some(max_price) = filter.max_price {
            builder.push(" AND m.price <= ").push_bind(max_price);
        }

        builder.push(" ORDER BY s.score DESC, m.price ASC LIMIT ").push_bind(limit as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn execute_select(
        &self,
        query: &str,
    ) -> Result<Vec<serde_json::Value>, RepositoryError> {
        ensure_select_only(query)?;
        let trimmed = query.trim().trim_end_matches(';');
        let rows = sqlx::query(trimmed).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}
