//! Snapshot repository: users, posts and per-frame emotion rows.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use emotion_core::{
    Error, LabelUpdate, Result, Snapshot, SnapshotRepository,
};

const SNAPSHOT_COLUMNS: &str = "id, user_id, post_id, snapshot, emotion, created_at, updated_at";

/// PostgreSQL implementation of SnapshotRepository.
#[derive(Clone)]
pub struct PgSnapshotRepository {
    pool: Pool<Postgres>,
}

impl PgSnapshotRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_snapshot_row(row: sqlx::postgres::PgRow) -> Snapshot {
        Snapshot {
            id: row.get("id"),
            user_id: row.get("user_id"),
            post_id: row.get("post_id"),
            snapshot: row.get("snapshot"),
            emotion: row.get("emotion"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn exists_for_pair(&self, user_id: &str, post_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM emotions WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn ensure_post(&self, post_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO posts (post_id) VALUES ($1) ON CONFLICT (post_id) DO NOTHING")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn insert_batch(
        &self,
        user_id: &str,
        post_id: &str,
        payloads: &[String],
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let result = sqlx::query(
            "INSERT INTO emotions (user_id, post_id, snapshot, emotion, created_at, updated_at)
             SELECT $1, $2, payload, NULL, $4, $4
             FROM UNNEST($3::text[]) WITH ORDINALITY AS t(payload, ord)
             ORDER BY ord",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(payloads)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        debug!(
            subsystem = "db",
            component = "snapshots",
            op = "insert_batch",
            user_id,
            post_id,
            snapshot_count = result.rows_affected(),
            "Snapshot batch committed"
        );
        Ok(result.rows_affected())
    }

    async fn list_unlabeled(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM emotions
             WHERE user_id = $1 AND post_id = $2 AND emotion IS NULL
             ORDER BY id"
        ))
        .bind(user_id)
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_snapshot_row).collect())
    }

    async fn apply_labels(&self, updates: &[LabelUpdate]) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut labeled = 0;
        for update in updates {
            let result = sqlx::query(
                "UPDATE emotions SET emotion = $1, updated_at = $2
                 WHERE id = $3 AND emotion IS NULL",
            )
            .bind(&update.emotion)
            .bind(now)
            .bind(update.snapshot_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            labeled += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(labeled)
    }

    async fn labels_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Option<String>>> {
        let labels: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT emotion FROM emotions WHERE user_id = $1 AND post_id = $2 ORDER BY id",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(labels)
    }

    async fn list_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM emotions
             WHERE user_id = $1 AND post_id = $2
             ORDER BY id"
        ))
        .bind(user_id)
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_snapshot_row).collect())
    }

    async fn truncate_all(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE users, posts, emotions, final_emotions, job_queue RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

