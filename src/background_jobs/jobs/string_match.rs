//! String matching of freshly imported beatmaps.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule, ShutdownBehavior},
};
use crate::config::PipelineSettings;
use crate::pipeline::string_matcher::match_with_string;
use std::time::Duration;

pub struct StringMatchJob {
    interval: Duration,
    batch_size: usize,
    suspend_when_idle: bool,
}

impl StringMatchJob {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.string_match_interval_secs),
            batch_size: settings.string_match_batch_size,
            suspend_when_idle: settings.suspend_when_idle,
        }
    }
}

impl BackgroundJob for StringMatchJob {
    fn id(&self) -> &str {
        "string_match"
    }

    fn name(&self) -> &'static str {
        "String Matching"
    }

    fn description(&self) -> &'static str {
        "Link new beatmaps to recordings by title and artist"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![
                HookEvent::OnStartup,
                HookEvent::BeatmapsImported,
                HookEvent::MatchesReset,
            ],
        }
    }

    fn suspend_when_idle(&self) -> bool {
        self.suspend_when_idle
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = match_with_string(
            ctx.pipeline.beatmaps.as_ref(),
            ctx.pipeline.recordings.as_ref(),
            self.batch_size,
        )
        .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        if report.processed == 0 {
            return Ok(JobOutcome::Idle);
        }
        ctx.fire_hook(HookEvent::StringMatchingDone);
        Ok(JobOutcome::Advanced(report.processed))
    }
}
