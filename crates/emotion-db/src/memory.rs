//! In-memory store implementing the snapshot, verdict, and job traits.
//!
//! Backs the pipeline and router tests. Semantics follow the PostgreSQL
//! repositories: label updates only touch unset rows, verdicts accumulate,
//! finished jobs drop their payload, and job claiming orders by priority
//! then age.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use emotion_core::{
    Error, FinalVerdict, Job, JobRepository, JobStatus, JobType, LabelUpdate, Result, Snapshot,
    SnapshotRepository, VerdictFilter, VerdictRepository, VerdictSummary,
};

#[derive(Default)]
struct State {
    users: HashSet<String>,
    posts: HashSet<String>,
    snapshots: Vec<Snapshot>,
    verdicts: Vec<FinalVerdict>,
    jobs: Vec<Job>,
    next_snapshot_id: i64,
    next_verdict_id: i64,
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_inserts: Arc<AtomicBool>,
    fail_labels: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `insert_batch` fail with a database-style error.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `apply_labels` fail without touching any row.
    pub fn set_fail_labels(&self, fail: bool) {
        self.fail_labels.store(fail, Ordering::SeqCst);
    }

    /// Number of stored snapshots across all pairs.
    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshots.len()
    }

    /// All stored verdicts, oldest first.
    pub async fn verdicts(&self) -> Vec<FinalVerdict> {
        self.state.lock().await.verdicts.clone()
    }

    /// All queued jobs, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn has_user(&self, user_id: &str) -> bool {
        self.state.lock().await.users.contains(user_id)
    }

    pub async fn has_post(&self, post_id: &str) -> bool {
        self.state.lock().await.posts.contains(post_id)
    }
}

fn pair_matches(s: &Snapshot, user_id: &str, post_id: &str) -> bool {
    s.user_id == user_id && s.post_id == post_id
}

#[async_trait]
impl SnapshotRepository for MemoryStore {
    async fn exists_for_pair(&self, user_id: &str, post_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .any(|s| pair_matches(s, user_id, post_id)))
    }

    async fn ensure_user(&self, user_id: &str) -> Result<()> {
        self.state.lock().await.users.insert(user_id.to_string());
        Ok(())
    }

    async fn ensure_post(&self, post_id: &str) -> Result<()> {
        self.state.lock().await.posts.insert(post_id.to_string());
        Ok(())
    }

    async fn insert_batch(
        &self,
        user_id: &str,
        post_id: &str,
        payloads: &[String],
    ) -> Result<u64> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Internal("snapshot insert rejected".to_string()));
        }

        let mut state = self.state.lock().await;
        if !state.users.contains(user_id) || !state.posts.contains(post_id) {
            return Err(Error::InvalidInput(format!(
                "unknown user or post: {user_id}/{post_id}"
            )));
        }

        let now = Utc::now();
        for payload in payloads {
            state.next_snapshot_id += 1;
            let id = state.next_snapshot_id;
            state.snapshots.push(Snapshot {
                id,
                user_id: user_id.to_string(),
                post_id: post_id.to_string(),
                snapshot: payload.clone(),
                emotion: None,
                created_at: now,
                updated_at: now,
            });
        }
        Ok(payloads.len() as u64)
    }

    async fn list_unlabeled(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| pair_matches(s, user_id, post_id) && s.emotion.is_none())
            .cloned()
            .collect())
    }

    async fn apply_labels(&self, updates: &[LabelUpdate]) -> Result<u64> {
        if self.fail_labels.load(Ordering::SeqCst) {
            return Err(Error::Internal("label commit rejected".to_string()));
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut labeled = 0;
        for update in updates {
            if let Some(row) = state
                .snapshots
                .iter_mut()
                .find(|s| s.id == update.snapshot_id && s.emotion.is_none())
            {
                row.emotion = Some(update.emotion.clone());
                row.updated_at = now;
                labeled += 1;
            }
        }
        Ok(labeled)
    }

    async fn labels_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Option<String>>> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| pair_matches(s, user_id, post_id))
            .map(|s| s.emotion.clone())
            .collect())
    }

    async fn list_for_pair(&self, user_id: &str, post_id: &str) -> Result<Vec<Snapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| pair_matches(s, user_id, post_id))
            .cloned()
            .collect())
    }

    async fn truncate_all(&self) -> Result<()> {
        *self.state.lock().await = State::default();
        Ok(())
    }
}

#[async_trait]
impl VerdictRepository for MemoryStore {
    async fn insert(&self, user_id: &str, post_id: &str, emotion: &str) -> Result<FinalVerdict> {
        let mut state = self.state.lock().await;
        state.next_verdict_id += 1;
        let verdict = FinalVerdict {
            id: state.next_verdict_id,
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            emotion: emotion.to_string(),
            created_at: Utc::now(),
        };
        state.verdicts.push(verdict.clone());
        Ok(verdict)
    }

    async fn list(&self, filter: &VerdictFilter) -> Result<Vec<VerdictSummary>> {
        let state = self.state.lock().await;

        let mut counts: HashMap<(&str, &str), i64> = HashMap::new();
        for s in &state.snapshots {
            *counts
                .entry((s.user_id.as_str(), s.post_id.as_str()))
                .or_default() += 1;
        }

        let mut summaries: Vec<VerdictSummary> = state
            .verdicts
            .iter()
            .filter(|v| filter.user_id.as_deref().map_or(true, |u| v.user_id == u))
            .filter(|v| filter.post_id.as_deref().map_or(true, |p| v.post_id == p))
            .filter_map(|v| {
                let count = counts.get(&(v.user_id.as_str(), v.post_id.as_str()))?;
                Some(VerdictSummary {
                    user_id: v.user_id.clone(),
                    post_id: v.post_id.clone(),
                    emotion: v.emotion.clone(),
                    created_at: v.created_at,
                    snapshot_count: *count,
                })
            })
            .collect();
        // Stable sort keeps insertion order within a post.
        summaries.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        Ok(summaries)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn queue(
        &self,
        pipeline_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let mut state = self.state.lock().await;
        state.jobs.push(Job {
            id,
            pipeline_id: pipeline_id.unwrap_or(id),
            job_type,
            status: JobStatus::Pending,
            priority: job_type.default_priority(),
            payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: emotion_core::defaults::JOB_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(id)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;

        // Highest priority wins; among equals the earliest queued (vector order).
        let mut best: Option<usize> = None;
        for (idx, job) in state.jobs.iter().enumerate() {
            if job.status != JobStatus::Pending {
                continue;
            }
            if !job_types.is_empty() && !job_types.contains(&job.job_type) {
                continue;
            }
            match best {
                Some(b) if state.jobs[b].priority >= job.priority => {}
                _ => best = Some(idx),
            }
        }

        Ok(best.map(|idx| {
            let job = &mut state.jobs[idx];
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.status = JobStatus::Completed;
        job.payload = None;
        job.result = result;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.error_message = Some(error.to_string());
        if retryable && job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Pending;
            job.started_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.payload = None;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_for_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        let finished = |j: &Job| matches!(j.status, JobStatus::Completed | JobStatus::Failed);

        let mut done: Vec<(Option<chrono::DateTime<Utc>>, Uuid)> = state
            .jobs
            .iter()
            .filter(|j| finished(j))
            .map(|j| (j.completed_at, j.id))
            .collect();
        // Newest first, rows without a completion time last.
        done.sort_by(|a, b| b.0.cmp(&a.0));
        let keep: HashSet<Uuid> = done
            .iter()
            .take(keep_count.max(0) as usize)
            .map(|(_, id)| *id)
            .collect();

        let before = state.jobs.len();
        state.jobs.retain(|j| !finished(j) || keep.contains(&j.id));
        Ok((before - state.jobs.len()) as i64)
    }
}
