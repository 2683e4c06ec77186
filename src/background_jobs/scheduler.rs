use super::context::JobContext;
use super::handle::{JobRun, JobRunStatus, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, JobOutcome, ShutdownBehavior};
use crate::pipeline::PipelineContext;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps when nothing is due.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// How long shutdown waits for a cancellable job to notice.
const CANCELLABLE_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles (not shared, managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Receiver for hook events fired by jobs and the pipeline handle.
    hook_receiver: mpsc::Receiver<HookEvent>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Finished jobs report here so the loop re-plans right away.
    completion_sender: mpsc::UnboundedSender<String>,
    completion_receiver: mpsc::UnboundedReceiver<String>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    /// Bounds how many jobs execute at once.
    permits: Arc<Semaphore>,
}

impl JobScheduler {
    pub fn new(
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            hook_receiver,
            command_receiver,
            completion_sender,
            completion_receiver,
            shutdown_token,
            job_context,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        // Fire OnStartup hooks
        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            // Clean up completed job handles
            self.cleanup_completed_jobs();

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(job_id) = self.completion_receiver.recv() => {
                    debug!("Job {} finished", job_id);
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Handle a command from the SchedulerHandle.
    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        {
            let mut state = self.shared_state.write().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
            state.suspended_jobs.remove(job_id);
        }

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = IDLE_CHECK_INTERVAL;
        let now = Utc::now();

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) || state.suspended_jobs.contains(job_id) {
                continue;
            }
            if job.schedule().interval().is_none() {
                continue;
            }
            match state.next_runs.get(job_id) {
                Some(next_run) if *next_run > now => {
                    let duration = (*next_run - now)
                        .to_std()
                        .unwrap_or(Duration::from_secs(1));
                    min_duration = min_duration.min(duration);
                }
                // Never ran, or due now
                _ => return Duration::ZERO,
            }
        }

        min_duration
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }
                if state.suspended_jobs.contains(job_id) {
                    debug!("Skipping suspended job: {}", job_id);
                    continue;
                }
                if job.schedule().interval().is_none() {
                    continue;
                }
                let due = state
                    .next_runs
                    .get(job_id)
                    .map_or(true, |next_run| *next_run <= now);
                if due {
                    jobs_to_run.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event, waking them
    /// up if they were suspended.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let mut state = self.shared_state.write().await;
            let listening: Vec<String> = state
                .jobs
                .iter()
                .filter(|(_, job)| job.schedule().listens_to(event))
                .map(|(job_id, _)| job_id.clone())
                .collect();

            for job_id in listening {
                state.suspended_jobs.remove(&job_id);
                if state.running_jobs.contains(&job_id) {
                    // Must not park after this run: its result may predate the event
                    debug!("Job {} is running, it will not be suspended after this run", job_id);
                    state.woken_jobs.insert(job_id);
                    continue;
                }
                jobs_to_trigger.push(job_id);
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let mut state = self.shared_state.write().await;
            let job = match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            };

            state.running_jobs.insert(job_id.to_string());
            state.woken_jobs.remove(job_id);
            state.last_runs.insert(
                job_id.to_string(),
                JobRun {
                    started_at: Utc::now(),
                    finished_at: None,
                    status: JobRunStatus::Running,
                    outcome: None,
                    error_message: None,
                    triggered_by: triggered_by.to_string(),
                },
            );
            // Planned from the start of the run so a slow run does not shift the cadence
            if let Some(interval) = job.schedule().interval() {
                state
                    .next_runs
                    .insert(job_id.to_string(), next_run_after(interval, job.jitter()));
            }
            job
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        // Create cancellation token for this job
        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);
        let permits = Arc::clone(&self.permits);
        let completion_sender = self.completion_sender.clone();
        let suspend_when_idle = job.suspend_when_idle();

        // Spawn the job in a blocking task since jobs are synchronous
        let handle = tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let start_time = Instant::now();
                    let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
                    Some((result, start_time.elapsed()))
                }
                Err(_) => None,
            };

            let (status, outcome, error_msg) = match result {
                Some((Ok(Ok(outcome)), elapsed)) => {
                    info!("Job {} completed in {:?}: {}", job_id_owned, elapsed, outcome);
                    (JobRunStatus::Completed, Some(outcome), None)
                }
                Some((Ok(Err(JobError::Cancelled)), elapsed)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Failed, None, Some("Cancelled".to_string()))
                }
                Some((Ok(Err(e)), elapsed)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, None, Some(e.to_string()))
                }
                Some((Err(e), elapsed)) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, None, Some(format!("Task panic: {}", e)))
                }
                None => {
                    warn!("Job {} dropped, the worker pool is closed", job_id_owned);
                    (JobRunStatus::Failed, None, Some("Worker pool closed".to_string()))
                }
            };

            {
                let mut state = shared_state.write().await;
                state.running_jobs.remove(&job_id_owned);
                let woken = state.woken_jobs.remove(&job_id_owned);
                if suspend_when_idle && outcome == Some(JobOutcome::Idle) && !woken {
                    debug!("Suspending job {} until one of its hooks fires", job_id_owned);
                    state.suspended_jobs.insert(job_id_owned.clone());
                }
                if let Some(run) = state.last_runs.get_mut(&job_id_owned) {
                    run.finished_at = Some(Utc::now());
                    run.status = status;
                    run.outcome = outcome;
                    run.error_message = error_msg;
                }
            }

            let _ = completion_sender.send(job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Clean up handles for completed jobs.
    fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            self.running_handles.remove(&job_id);
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let behaviors: HashMap<String, ShutdownBehavior> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .map(|(job_id, job)| (job_id.clone(), job.shutdown_behavior()))
                .collect()
        };

        // Cancel cancellable jobs
        for (job_id, token) in &self.job_cancel_tokens {
            if behaviors.get(job_id) == Some(&ShutdownBehavior::Cancellable) {
                debug!("Cancelling job: {}", job_id);
                token.cancel();
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            match behaviors.get(&job_id) {
                Some(ShutdownBehavior::WaitForCompletion) => {
                    info!("Waiting for job {} to complete...", job_id);
                    let _ = handle.await;
                }
                _ => {
                    let _ = tokio::time::timeout(CANCELLABLE_SHUTDOWN_GRACE, handle).await;
                }
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// When an interval job runs next, counting from now.
fn next_run_after(interval: Duration, jitter: Option<Duration>) -> DateTime<Utc> {
    let jitter = match jitter {
        Some(max) if !max.is_zero() => {
            Duration::from_millis(rand::rng().random_range(0..=max.as_millis() as u64))
        }
        _ => Duration::ZERO,
    };
    Utc::now() + chrono::Duration::from_std(interval + jitter).unwrap_or_default()
}

/// Create a scheduler and its handle.
///
/// `hook_sender` must be the sending side of `hook_receiver`; jobs use it to
/// wake each other up.
pub fn create_scheduler(
    hook_sender: mpsc::Sender<HookEvent>,
    hook_receiver: mpsc::Receiver<HookEvent>,
    shutdown_token: CancellationToken,
    pipeline: Arc<PipelineContext>,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let max_concurrent_jobs = pipeline.settings.max_concurrent_jobs;

    let job_context = JobContext::new(shutdown_token.child_token(), pipeline, hook_sender.clone());

    let scheduler = JobScheduler::new(
        hook_receiver,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
        max_concurrent_jobs,
    );

    let handle = SchedulerHandle::new(command_tx, hook_sender, shared_state);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::JobSchedule;
    use crate::pipeline::test_support::Fixture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        outcome: Option<JobOutcome>,
        suspend: bool,
        work: Duration,
        shutdown: ShutdownBehavior,
        executions: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                outcome: Some(JobOutcome::Advanced(1)),
                suspend: false,
                work: Duration::ZERO,
                shutdown: ShutdownBehavior::Cancellable,
                executions: Arc::new(AtomicUsize::new(0)),
                running: Arc::new(AtomicUsize::new(0)),
                max_running: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn suspend_when_idle(&self) -> bool {
            self.suspend
        }

        fn shutdown_behavior(&self) -> ShutdownBehavior {
            self.shutdown
        }

        fn execute(&self, _ctx: &JobContext) -> Result<JobOutcome, JobError> {
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            std::thread::sleep(self.work);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .ok_or_else(|| JobError::ExecutionFailed("Test failure".to_string()))
        }
    }

    fn create_test_scheduler(
        max_concurrent_jobs: usize,
    ) -> (JobScheduler, SchedulerHandle, CancellationToken) {
        let mut fixture = Fixture::new(vec![], None);
        fixture.ctx.settings.max_concurrent_jobs = max_concurrent_jobs;
        let (hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let (scheduler, handle) = create_scheduler(
            hook_sender,
            hook_receiver,
            shutdown_token.clone(),
            Arc::new(fixture.ctx),
        );
        (scheduler, handle, shutdown_token)
    }

    async fn stop(shutdown_token: CancellationToken, task: JoinHandle<()>) {
        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let (mut scheduler, handle, _token) = create_test_scheduler(4);
        assert!(handle.list_jobs().await.is_empty());

        scheduler
            .register_job(Arc::new(TestJob::new(
                "test_job",
                JobSchedule::Hook(HookEvent::OnStartup),
            )))
            .await;

        let jobs = handle.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "test_job");
        assert_eq!(jobs[0].name, "Test Job");
        assert!(!jobs[0].is_running);
        assert!(jobs[0].last_run.is_none());
        assert!(handle.job_exists("test_job").await);
        assert!(!handle.job_exists("nonexistent").await);
        assert_eq!(scheduler.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_job_execution_on_startup_hook() {
        let (mut scheduler, handle, token) = create_test_scheduler(4);
        let job = TestJob::new("startup_job", JobSchedule::Hook(HookEvent::OnStartup));
        let executions = job.executions.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let info = handle.get_job("startup_job").await.unwrap();
        let last_run = info.last_run.unwrap();
        assert_eq!(last_run.status, "completed");
        assert_eq!(last_run.outcome.as_deref(), Some("advanced 1"));
        assert_eq!(last_run.triggered_by, "hook:OnStartup");

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let (mut scheduler, handle, token) = create_test_scheduler(4);
        let mut job = TestJob::new("failing_job", JobSchedule::Hook(HookEvent::OnStartup));
        job.outcome = None;
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let last_run = handle.get_job("failing_job").await.unwrap().last_run.unwrap();
        assert_eq!(last_run.status, "failed");
        assert!(last_run.error_message.unwrap().contains("Test failure"));

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_idle_job_is_suspended_until_hook() {
        let (mut scheduler, handle, token) = create_test_scheduler(4);
        let mut job = TestJob::new(
            "idle_job",
            JobSchedule::Combined {
                interval: Some(Duration::from_millis(20)),
                hooks: vec![HookEvent::BeatmapsImported],
            },
        );
        job.outcome = Some(JobOutcome::Idle);
        job.suspend = true;
        let executions = job.executions.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Interval ticks skip the parked job
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(handle.is_job_suspended("idle_job").await);

        handle.fire_hook(HookEvent::BeatmapsImported).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        assert!(handle.is_job_suspended("idle_job").await);

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_advancing_job_keeps_running_on_interval() {
        let (mut scheduler, handle, token) = create_test_scheduler(4);
        let mut job = TestJob::new("busy_job", JobSchedule::Interval(Duration::from_millis(20)));
        job.suspend = true;
        let executions = job.executions.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(executions.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_job_suspended("busy_job").await);

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let (mut scheduler, handle, token) = create_test_scheduler(4);
        let job = TestJob::new("manual_job", JobSchedule::Hook(HookEvent::MatchesReset));
        let executions = job.executions.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 0);

        handle.trigger_job("manual_job").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(matches!(
            handle.trigger_job("nonexistent").await,
            Err(JobError::NotFound)
        ));

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (mut scheduler, _handle, token) = create_test_scheduler(1);
        let max_running = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let mut counters = Vec::new();
        for id in ["first", "second", "third"] {
            let mut job = TestJob::new(id, JobSchedule::Hook(HookEvent::OnStartup));
            job.work = Duration::from_millis(50);
            job.running = running.clone();
            job.max_running = max_running.clone();
            counters.push(job.executions.clone());
            scheduler.register_job(Arc::new(job)).await;
        }

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(max_running.load(Ordering::SeqCst), 1);

        stop(token, task).await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_completion() {
        let (mut scheduler, _handle, token) = create_test_scheduler(4);
        let mut job = TestJob::new("slow_job", JobSchedule::Hook(HookEvent::OnStartup));
        job.work = Duration::from_millis(300);
        job.shutdown = ShutdownBehavior::WaitForCompletion;
        let executions = job.executions.clone();
        scheduler.register_job(Arc::new(job)).await;

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
