//! Final verdict repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};

use emotion_core::{Error, FinalVerdict, Result, VerdictFilter, VerdictRepository, VerdictSummary};

/// PostgreSQL implementation of VerdictRepository.
#[derive(Clone)]
pub struct PgVerdictRepository {
    pool: Pool<Postgres>,
}

impl PgVerdictRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerdictRepository for PgVerdictRepository {
    async fn insert(&self, user_id: &str, post_id: &str, emotion: &str) -> Result<FinalVerdict> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO final_emotions (user_id, post_id, emotion, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             RETURNING id, user_id, post_id, emotion, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(emotion)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(FinalVerdict {
            id: row.get("id"),
            user_id: row.get("user_id"),
            post_id: row.get("post_id"),
            emotion: row.get("emotion"),
            created_at: row.get("created_at"),
        })
    }

    async fn list(&self, filter: &VerdictFilter) -> Result<Vec<VerdictSummary>> {
        let mut conditions = Vec::new();
        let mut param_idx = 1;

        if filter.user_id.is_some() {
            conditions.push(format!("f.user_id = ${}", param_idx));
            param_idx += 1;
        }
        if filter.post_id.is_some() {
            conditions.push(format!("f.post_id = ${}", param_idx));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT f.user_id, f.post_id, f.emotion, f.created_at,
                    COUNT(e.id) AS snapshot_count
             FROM final_emotions f
             JOIN emotions e ON e.user_id = f.user_id AND e.post_id = f.post_id
             {}
             GROUP BY f.id, f.user_id, f.post_id, f.emotion, f.created_at
             ORDER BY f.post_id, f.id",
            where_clause
        );

        let mut q = sqlx::query(&query);
        if let Some(user_id) = &filter.user_id {
            q = q.bind(user_id);
        }
        if let Some(post_id) = &filter.post_id {
            q = q.bind(post_id);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|row| VerdictSummary {
                user_id: row.get("user_id"),
                post_id: row.get("post_id"),
                emotion: row.get::<Option<String>, _>("emotion").unwrap_or_default(),
                created_at: row.get("created_at"),
                snapshot_count: row.get("snapshot_count"),
            })
            .collect())
    }
}
