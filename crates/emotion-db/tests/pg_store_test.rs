//! PostgreSQL integration tests for the snapshot store, verdicts, and job queue.
//!
//! Require a migrated database reachable at `DATABASE_URL`; run with
//! `cargo test -p emotion-db -- --ignored`.

use emotion_db::test_fixtures::{test_database_url, unique_pair};
use emotion_db::{
    create_pool, JobRepository, JobStatus, JobType, LabelUpdate, PgJobRepository,
    PgSnapshotRepository, PgVerdictRepository, SnapshotRepository, VerdictFilter,
    VerdictRepository,
};
use serde_json::json;
use sqlx::PgPool;

async fn setup_test_pool() -> PgPool {
    create_pool(&test_database_url())
        .await
        .expect("Failed to create test pool")
}

async fn seed(repo: &PgSnapshotRepository, user: &str, post: &str, payloads: &[&str]) {
    repo.ensure_user(user).await.unwrap();
    repo.ensure_post(post).await.unwrap();
    let payloads: Vec<String> = payloads.iter().map(|p| p.to_string()).collect();
    let inserted = repo.insert_batch(user, post, &payloads).await.unwrap();
    assert_eq!(inserted, payloads.len() as u64);
}

#[tokio::test]
#[ignore]
async fn test_insert_batch_and_exists_for_pair() {
    let pool = setup_test_pool().await;
    let repo = PgSnapshotRepository::new(pool);
    let (user, post) = unique_pair("batch");

    assert!(!repo.exists_for_pair(&user, &post).await.unwrap());
    seed(&repo, &user, &post, &["AAAA", "BBBB", "CCCC"]).await;
    assert!(repo.exists_for_pair(&user, &post).await.unwrap());

    let rows = repo.list_for_pair(&user, &post).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].snapshot, "AAAA");
    assert_eq!(rows[2].snapshot, "CCCC");
    assert!(rows.iter().all(|r| r.emotion.is_none()));
}

#[tokio::test]
#[ignore]
async fn test_ensure_user_and_post_idempotent() {
    let pool = setup_test_pool().await;
    let repo = PgSnapshotRepository::new(pool);
    let (user, post) = unique_pair("idem");

    repo.ensure_user(&user).await.unwrap();
    repo.ensure_user(&user).await.unwrap();
    repo.ensure_post(&post).await.unwrap();
    repo.ensure_post(&post).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_apply_labels_skips_labeled_rows() {
    let pool = setup_test_pool().await;
    let repo = PgSnapshotRepository::new(pool);
    let (user, post) = unique_pair("labels");
    seed(&repo, &user, &post, &["a", "b"]).await;

    let rows = repo.list_unlabeled(&user, &post).await.unwrap();
    let updates: Vec<LabelUpdate> = rows
        .iter()
        .map(|r| LabelUpdate {
            snapshot_id: r.id,
            emotion: "happy".to_string(),
        })
        .collect();
    assert_eq!(repo.apply_labels(&updates).await.unwrap(), 2);

    // Second pass finds nothing to label.
    assert_eq!(repo.apply_labels(&updates).await.unwrap(), 0);
    assert!(repo.list_unlabeled(&user, &post).await.unwrap().is_empty());

    let labels = repo.labels_for_pair(&user, &post).await.unwrap();
    assert_eq!(labels, vec![Some("happy".to_string()); 2]);
}

#[tokio::test]
#[ignore]
async fn test_verdict_list_includes_snapshot_count() {
    let pool = setup_test_pool().await;
    let snapshots = PgSnapshotRepository::new(pool.clone());
    let verdicts = PgVerdictRepository::new(pool);
    let (user, post) = unique_pair("verdict");
    seed(&snapshots, &user, &post, &["a", "b", "c", "d"]).await;

    let verdict = verdicts.insert(&user, &post, "surprise").await.unwrap();
    assert_eq!(verdict.emotion, "surprise");

    let listed = verdicts
        .list(&VerdictFilter {
            user_id: Some(user.clone()),
            post_id: Some(post.clone()),
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].snapshot_count, 4);
    assert_eq!(listed[0].emotion, "surprise");
}

#[tokio::test]
#[ignore]
async fn test_job_queue_claim_complete_and_fail() {
    let pool = setup_test_pool().await;
    let jobs = PgJobRepository::new(pool);

    let root = jobs
        .queue(None, JobType::Intake, Some(json!({"user_id": "u"})))
        .await
        .unwrap();
    let child = jobs
        .queue(Some(root), JobType::Registration, None)
        .await
        .unwrap();

    let pipeline = jobs.list_for_pipeline(root).await.unwrap();
    assert_eq!(pipeline.len(), 2);
    assert_eq!(pipeline[0].id, root);
    assert_eq!(pipeline[1].pipeline_id, root);

    jobs.complete(root, Some(json!({"outcome": "submitted"})))
        .await
        .unwrap();
    let done = jobs.get(root).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());

    jobs.fail(child, "timeout", true).await.unwrap();
    let retried = jobs.get(child).await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 1);

    jobs.fail(child, "bad payload", false).await.unwrap();
    let failed = jobs.get(child).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("bad payload"));
}
