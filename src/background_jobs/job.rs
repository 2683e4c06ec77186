use super::context::JobContext;
use std::time::Duration;

/// Schedule for when a job should run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSchedule {
    /// Run at fixed intervals
    Interval(Duration),
    /// Run only in response to hooks
    Hook(HookEvent),
    /// Combination of scheduled and hook-triggered
    Combined {
        interval: Option<Duration>,
        hooks: Vec<HookEvent>,
    },
}

impl JobSchedule {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            JobSchedule::Interval(interval) => Some(*interval),
            JobSchedule::Combined { interval, .. } => *interval,
            JobSchedule::Hook(_) => None,
        }
    }

    pub fn listens_to(&self, event: HookEvent) -> bool {
        match self {
            JobSchedule::Hook(hook_event) => *hook_event == event,
            JobSchedule::Combined { hooks, .. } => hooks.contains(&event),
            JobSchedule::Interval(_) => false,
        }
    }
}

/// Events that can trigger hook-based jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    OnStartup,
    /// An import inserted at least one new beatmap.
    BeatmapsImported,
    /// String matching moved beatmaps out of INITIAL.
    StringMatchingDone,
    FingerprintsGenerated,
    FingerprintsResolved,
    /// An operator reset or cleared a match.
    MatchesReset,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
            HookEvent::BeatmapsImported => write!(f, "BeatmapsImported"),
            HookEvent::StringMatchingDone => write!(f, "StringMatchingDone"),
            HookEvent::FingerprintsGenerated => write!(f, "FingerprintsGenerated"),
            HookEvent::FingerprintsResolved => write!(f, "FingerprintsResolved"),
            HookEvent::MatchesReset => write!(f, "MatchesReset"),
        }
    }
}

/// How a job should be handled during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// What a successful run achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// This many items moved forward.
    Advanced(usize),
    /// There was nothing to do.
    Idle,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Advanced(count) => write!(f, "advanced {}", count),
            JobOutcome::Idle => write!(f, "idle"),
        }
    }
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// Random delay up to this long added to every interval.
    fn jitter(&self) -> Option<Duration> {
        None
    }

    /// Whether an idle run parks the job until one of its hooks fires.
    /// Interval ticks skip a parked job.
    fn suspend_when_idle(&self) -> bool {
        false
    }

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job.
    ///
    /// This method is called from a blocking context using `spawn_blocking`.
    /// The implementation should check `ctx.is_cancelled()` before starting
    /// work and return early with `JobError::Cancelled` if true.
    fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError>;
}
