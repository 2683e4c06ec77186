//! Fingerprinting of beatmap audio, one beatmap per run.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule, ShutdownBehavior},
};
use crate::config::PipelineSettings;
use crate::pipeline::fingerprint_generator::{generate_next, GenerationOutcome};
use std::time::Duration;

pub struct FingerprintGenerationJob {
    interval: Duration,
    suspend_when_idle: bool,
}

impl FingerprintGenerationJob {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.fingerprint_interval_secs),
            suspend_when_idle: settings.suspend_when_idle,
        }
    }
}

impl BackgroundJob for FingerprintGenerationJob {
    fn id(&self) -> &str {
        "fingerprint_generation"
    }

    fn name(&self) -> &'static str {
        "Fingerprint Generation"
    }

    fn description(&self) -> &'static str {
        "Download a beatmap's audio and compute its acoustic fingerprint"
    }

    fn schedule(&self) -> JobSchedule {
        // Resolving drains HAS_FINGERPRINT, which lets string matches be upgraded
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![
                HookEvent::OnStartup,
                HookEvent::StringMatchingDone,
                HookEvent::FingerprintsResolved,
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

        let outcome = generate_next(
            ctx.pipeline.beatmaps.as_ref(),
            &ctx.pipeline.sites,
            ctx.pipeline.engine.as_ref(),
        )
        .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        match outcome {
            GenerationOutcome::Idle => Ok(JobOutcome::Idle),
            GenerationOutcome::Fingerprinted { .. } => {
                ctx.fire_hook(HookEvent::FingerprintsGenerated);
                Ok(JobOutcome::Advanced(1))
            }
            // The beatmap moved to ERROR, which still counts as progress
            GenerationOutcome::Failed { .. } => Ok(JobOutcome::Advanced(1)),
        }
    }
}
