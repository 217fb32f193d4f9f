//! Job worker and runner for processing stage jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use emotion_core::defaults::{EVENT_BUS_CAPACITY, JOB_MAX_CONCURRENT, JOB_TIMEOUT_SECS};
use emotion_core::{Job, JobRepository, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// How many stage jobs a worker runs at once and how it waits for work.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between empty polls, unless woken by a queue notification.
    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    /// A handler still running after this is abandoned.
    pub job_timeout_secs: u64,
    /// Requeue abandoned jobs while retries remain. Off by default: a stage
    /// may have committed writes before the timeout fired.
    pub retry_on_timeout: bool,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            retry_on_timeout: false,
            enabled: true,
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl WorkerConfig {
    /// `JOB_WORKER_ENABLED` (anything but `false`/`0` enables),
    /// `JOB_MAX_CONCURRENT`, `JOB_POLL_INTERVAL_MS`, `JOB_TIMEOUT_SECS`,
    /// `JOB_RETRY_ON_TIMEOUT` (`true`/`1` enables).
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("JOB_WORKER_ENABLED")
                .map(|v| !matches!(v.trim(), "false" | "0"))
                .unwrap_or(defaults.enabled),
            max_concurrent_jobs: env_number("JOB_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            poll_interval_ms: env_number("JOB_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms),
            job_timeout_secs: env_number("JOB_TIMEOUT_SECS")
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.job_timeout_secs),
            retry_on_timeout: std::env::var("JOB_RETRY_ON_TIMEOUT")
                .map(|v| matches!(v.trim(), "true" | "1"))
                .unwrap_or(defaults.retry_on_timeout),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Broadcast to every [`WorkerHandle::events`] subscriber.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted {
        job_id: Uuid,
        pipeline_id: Uuid,
        job_type: JobType,
    },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted {
        job_id: Uuid,
        pipeline_id: Uuid,
        job_type: JobType,
    },
    /// A job failed. `will_retry` is set when it went back to the queue.
    JobFailed {
        job_id: Uuid,
        pipeline_id: Uuid,
        job_type: JobType,
        error: String,
        will_retry: bool,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Returned by [`JobWorker::start`].
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Stop claiming. Jobs already claimed run to completion first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| emotion_core::Error::Internal("worker already stopped".into()))
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>;

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    /// Wakes the idle loop early when a job is queued.
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            jobs,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            notify: None,
        }
    }

    /// Replaces any handler already registered for the same stage.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let stage = handler.job_type();
        self.handlers.write().await.insert(stage, Arc::new(handler));
        debug!(job_type = stage.as_str(), "Stage handler registered");
    }

    /// Spawn the claim loop onto the runtime.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Stage worker disabled");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            job_timeout_secs = self.config.job_timeout_secs,
            "Stage worker running"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Stage worker stopping");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                let woken = async {
                    match &self.notify {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Stage worker stopping");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = woken => {}
                }
            } else {
                debug!(claimed, "Running claimed stage jobs");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Stage task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Stage worker stopped");
    }

    /// Claim the next job this worker has a handler for.
    async fn claim_job(&self) -> Option<Job> {
        let job_types: Vec<JobType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        if job_types.is_empty() {
            return None;
        }

        match self.jobs.claim_next_for_types(&job_types).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Claim query failed");
                None
            }
        }
    }

    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: self.jobs.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: Duration::from_secs(self.config.job_timeout_secs),
            retry_on_timeout: self.config.retry_on_timeout,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }
}

/// What a spawned task needs to run one claimed job.
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
    retry_on_timeout: bool,
}

impl JobWorkerRef {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let pipeline_id = job.pipeline_id;
        let job_type = job.job_type;
        let retries_left = job.retry_count < job.max_retries;

        info!(%job_id, %pipeline_id, job_type = job_type.as_str(), "Stage job claimed");

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            pipeline_id,
            job_type,
        });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job).with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        percent,
                        message: message.map(String::from),
                    });
                });

                match tokio::time::timeout(self.job_timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let timeout_secs = self.job_timeout.as_secs();
                        warn!(
                            %job_id,
                            job_type = job_type.as_str(),
                            timeout_secs,
                            retry = self.retry_on_timeout,
                            "Stage handler timed out"
                        );
                        let message = format!("handler timeout after {}s", timeout_secs);
                        if self.retry_on_timeout {
                            JobResult::Retry(message)
                        } else {
                            JobResult::Failed(message)
                        }
                    }
                }
            }
            None => {
                warn!(job_type = job_type.as_str(), "Claimed a job with no handler");
                JobResult::Failed(format!("no handler for {} jobs", job_type.as_str()))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(body) => {
                if let Err(e) = self.jobs.complete(job_id, body).await {
                    error!(error = %e, %job_id, "Could not record job completion");
                } else {
                    info!(%job_id, job_type = job_type.as_str(), duration_ms, "Stage job done");
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        pipeline_id,
                        job_type,
                    });
                }
            }
            JobResult::Failed(error) => {
                self.record_failure(job_id, pipeline_id, job_type, error, false, duration_ms)
                    .await
            }
            JobResult::Retry(error) => {
                self.record_failure(job_id, pipeline_id, job_type, error, retries_left, duration_ms)
                    .await
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        pipeline_id: Uuid,
        job_type: JobType,
        error: String,
        will_retry: bool,
        duration_ms: u64,
    ) {
        if let Err(e) = self.jobs.fail(job_id, &error, will_retry).await {
            error!(error = %e, %job_id, "Could not record job failure");
            return;
        }
        warn!(%job_id, job_type = job_type.as_str(), %error, will_retry, duration_ms, "Stage job failed");
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            pipeline_id,
            job_type,
            error,
            will_retry,
        });
    }
}

/// Assembles a [`JobWorker`] with its stage handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Wake the worker as soon as the queue signals a new job.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub async fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.jobs, self.config);
        worker.notify = self.notify;
        {
            let mut table = worker.handlers.write().await;
            for handler in self.handlers {
                table.insert(handler.job_type(), Arc::from(handler));
            }
        }
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use emotion_core::JobStatus;
    use emotion_db::MemoryStore;
    use serde_json::json;

    /// Handler returning a fixed result.
    struct FixedHandler {
        job_type: JobType,
        result: fn() -> JobResult,
    }

    #[async_trait]
    impl JobHandler for FixedHandler {
        fn job_type(&self) -> JobType {
            self.job_type
        }

        async fn execute(&self, ctx: JobContext) -> JobResult {
            ctx.report_progress(100, Some("done"));
            (self.result)()
        }
    }

    /// Handler that never finishes in time.
    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        fn job_type(&self) -> JobType {
            JobType::Intake
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            sleep(Duration::from_secs(3600)).await;
            JobResult::Success(None)
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default().with_poll_interval(10)
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<WorkerEvent>, pred: F) -> WorkerEvent
    where
        F: Fn(&WorkerEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not received in time")
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.job_timeout_secs, JOB_TIMEOUT_SECS);
        assert!(!config.retry_on_timeout);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_job_timeout_secs(30)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.job_timeout_secs, 30);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_worker_completes_job_with_result() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .queue(None, JobType::Intake, Some(json!({})))
            .await
            .unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(fast_config())
            .with_handler(FixedHandler {
                job_type: JobType::Intake,
                result: || JobResult::Success(Some(json!({"outcome": "submitted"}))),
            })
            .build()
            .await;
        let handle = worker.start();
        let mut events = handle.events();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
        match event {
            WorkerEvent::JobCompleted {
                job_id,
                pipeline_id,
                job_type,
            } => {
                assert_eq!(job_id, id);
                assert_eq!(pipeline_id, id);
                assert_eq!(job_type, JobType::Intake);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["outcome"], "submitted");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_failed_result_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let id = store.queue(None, JobType::Intake, None).await.unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(fast_config())
            .with_handler(FixedHandler {
                job_type: JobType::Intake,
                result: || JobResult::Failed("bad input".to_string()),
            })
            .build()
            .await;
        let handle = worker.start();
        let mut events = handle.events();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
        assert!(matches!(
            event,
            WorkerEvent::JobFailed {
                will_retry: false,
                ..
            }
        ));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_timeout_fails_job_by_default() {
        let store = Arc::new(MemoryStore::new());
        let id = store.queue(None, JobType::Intake, None).await.unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(fast_config().with_job_timeout_secs(1).with_max_concurrent(1))
            .with_handler(SlowHandler)
            .build()
            .await;
        let handle = worker.start();
        let mut events = handle.events();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
        assert!(matches!(
            event,
            WorkerEvent::JobFailed {
                will_retry: false,
                ..
            }
        ));

        handle.shutdown().await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert!(job.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_worker_timeout_requeues_job_when_enabled() {
        let store = Arc::new(MemoryStore::new());
        let id = store.queue(None, JobType::Intake, None).await.unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(
                fast_config()
                    .with_job_timeout_secs(1)
                    .with_max_concurrent(1)
                    .with_retry_on_timeout(true),
            )
            .with_handler(SlowHandler)
            .build()
            .await;
        let handle = worker.start();
        let mut events = handle.events();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
        match event {
            WorkerEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                assert_eq!(job_id, id);
                assert!(error.contains("timeout"));
                assert!(will_retry);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        handle.shutdown().await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert!(job.retry_count >= 1);
    }

    #[tokio::test]
    async fn test_worker_only_claims_registered_types() {
        let store = Arc::new(MemoryStore::new());
        let other = store.queue(None, JobType::Aggregation, None).await.unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(fast_config())
            .with_handler(FixedHandler {
                job_type: JobType::Intake,
                result: || JobResult::Success(None),
            })
            .build()
            .await;
        assert!(worker.claim_job().await.is_none());
        assert_eq!(worker.pending_count().await.unwrap(), 1);

        let job = store.get(other).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_disabled_worker_processes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.queue(None, JobType::Intake, None).await.unwrap();

        let worker = WorkerBuilder::new(store.clone())
            .with_config(fast_config().with_enabled(false))
            .with_handler(FixedHandler {
                job_type: JobType::Intake,
                result: || JobResult::Success(None),
            })
            .build()
            .await;
        let _handle = worker.start();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[test]
    fn test_worker_event_debug() {
        let job_id = Uuid::new_v4();
        let event = WorkerEvent::JobStarted {
            job_id,
            pipeline_id: job_id,
            job_type: JobType::Classification,
        };

        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("JobStarted"));
        assert!(debug_str.contains("Classification"));
    }
}
