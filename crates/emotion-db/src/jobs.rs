//! Stage queue backed by the `job_queue` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use emotion_core::{Error, Job, JobRepository, JobStatus, JobType, Result};

/// Enum columns are read back as text so rows decode without custom sqlx types.
const SELECT_JOB: &str = "id, pipeline_id, job_type::text AS job_type, status::text AS status, \
                          priority, payload, result, error_message, retry_count, max_retries, \
                          created_at, started_at, completed_at";

#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
    queued: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            queued: Arc::new(Notify::new()),
        }
    }

    /// Signalled after every successful `queue`, for workers parked between polls.
    pub fn job_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.queued)
    }

    fn decode(row: PgRow) -> Result<Job> {
        let kind: String = row.try_get("job_type")?;
        let job_type = JobType::from_db(&kind)
            .ok_or_else(|| Error::Job(format!("unrecognized job type '{}'", kind)))?;
        let status: String = row.try_get("status")?;

        Ok(Job {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            job_type,
            status: JobStatus::from_db(&status),
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(
        &self,
        pipeline_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO job_queue (id, pipeline_id, job_type, status, priority, payload, created_at)
             VALUES ($1, $2, $3::job_type, 'pending', $4, $5, $6)",
        )
        .bind(id)
        .bind(pipeline_id.unwrap_or(id))
        .bind(job_type.as_str())
        .bind(job_type.default_priority())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(subsystem = "db", component = "jobs", job_id = %id, job_type = job_type.as_str(), "Job queued");
        self.queued.notify_waiters();
        Ok(id)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let wanted: Vec<&str> = job_types.iter().map(JobType::as_str).collect();

        // An empty type list claims from every stage.
        let claimed = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'running', started_at = $2
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'
                   AND (cardinality($1::text[]) = 0 OR job_type::text = ANY($1))
                 ORDER BY priority DESC, created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {SELECT_JOB}"
        ))
        .bind(&wanted)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        claimed.map(Self::decode).transpose()
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE job_queue
             SET status = 'completed', completed_at = $2, result = $3, payload = NULL
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(Utc::now())
        .bind(result)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    /// Requeue while retries remain and the failure is retryable, otherwise
    /// mark the job failed. Decided in a single statement against the row's
    /// current counters.
    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let outcome: Option<String> = sqlx::query_scalar(
            "UPDATE job_queue SET
                 status = CASE WHEN $2 AND retry_count < max_retries
                               THEN 'pending'::job_status ELSE 'failed'::job_status END,
                 retry_count = CASE WHEN $2 AND retry_count < max_retries
                                    THEN retry_count + 1 ELSE retry_count END,
                 started_at = CASE WHEN $2 AND retry_count < max_retries
                                   THEN NULL ELSE started_at END,
                 completed_at = CASE WHEN $2 AND retry_count < max_retries
                                     THEN NULL ELSE $3 END,
                 payload = CASE WHEN $2 AND retry_count < max_retries
                                THEN payload ELSE NULL END,
                 error_message = $4
             WHERE id = $1
             RETURNING status::text",
        )
        .bind(job_id)
        .bind(retryable)
        .bind(Utc::now())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match outcome {
            Some(status) => {
                debug!(subsystem = "db", component = "jobs", job_id = %job_id, status = %status, "Job failure recorded");
                Ok(())
            }
            None => Err(Error::NotFound(format!("job {}", job_id))),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        sqlx::query(&format!("SELECT {SELECT_JOB} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Self::decode)
            .transpose()
    }

    async fn list_for_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Job>> {
        sqlx::query(&format!(
            "SELECT {SELECT_JOB} FROM job_queue WHERE pipeline_id = $1 ORDER BY created_at, id"
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::decode)
        .collect()
    }

    async fn pending_count(&self) -> Result<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let removed = sqlx::query(
            "DELETE FROM job_queue
             WHERE status IN ('completed', 'failed')
               AND id NOT IN (
                   SELECT id FROM job_queue
                   WHERE status IN ('completed', 'failed')
                   ORDER BY completed_at DESC NULLS LAST
                   LIMIT $1
               )",
        )
        .bind(keep_count.max(0))
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(subsystem = "db", component = "jobs", op = "cleanup", removed, keep_count, "Finished jobs pruned");
        Ok(removed as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_aliases_enum_casts() {
        assert!(SELECT_JOB.contains("job_type::text AS job_type"));
        assert!(SELECT_JOB.contains("status::text AS status"));
    }

    #[test]
    fn test_every_stage_round_trips_through_db_name() {
        for jt in JobType::ALL {
            assert_eq!(JobType::from_db(jt.as_str()), Some(jt));
        }
        assert_eq!(JobType::from_db("reembed"), None);
    }
}
