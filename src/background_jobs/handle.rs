use super::job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub is_suspended: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                hooks: None,
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                hooks: Some(vec![event.to_string()]),
                value_secs: None,
            },
            JobSchedule::Combined { interval, hooks } => JobScheduleInfo {
                schedule_type: "combined".to_string(),
                value_secs: interval.map(|d| d.as_secs()),
                hooks: Some(hooks.iter().map(|h| h.to_string()).collect()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

/// The latest run of a job, kept in memory.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub outcome: Option<JobOutcome>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub outcome: Option<String>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            outcome: run.outcome.map(|o| o.to_string()),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: HashSet<String>,
    /// Jobs parked after an idle run
    pub suspended_jobs: HashSet<String>,
    /// Running jobs one of whose hooks fired mid-run
    pub woken_jobs: HashSet<String>,
    pub next_runs: HashMap<String, DateTime<Utc>>,
    pub last_runs: HashMap<String, JobRun>,
}

impl SharedJobState {
    fn job_info(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> JobInfo {
        JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running: self.running_jobs.contains(job_id),
            is_suspended: self.suspended_jobs.contains(job_id),
            last_run: self.last_runs.get(job_id).cloned().map(JobRunInfo::from),
            next_run_at: self.next_runs.get(job_id).map(|t| t.to_rfc3339()),
        }
    }
}

/// Handle to interact with the job scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Channel the scheduler receives hook events on
    hook_tx: mpsc::Sender<HookEvent>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        hook_tx: mpsc::Sender<HookEvent>,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            command_tx,
            hook_tx,
            shared_state,
        }
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(job_id, job)| state.job_info(job_id, job))
            .collect();

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|job| state.job_info(job_id, job))
    }

    /// Trigger a job manually. A parked job is woken up.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Wake every job listening for `event`.
    pub async fn fire_hook(&self, event: HookEvent) -> Result<(), JobError> {
        self.hook_tx
            .send(event)
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    pub async fn is_job_suspended(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.suspended_jobs.contains(job_id)
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }
}
