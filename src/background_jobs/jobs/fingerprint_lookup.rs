//! AcoustID lookup of computed fingerprints, one beatmap per run.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule, ShutdownBehavior},
};
use crate::config::PipelineSettings;
use crate::pipeline::fingerprint_resolver::{resolve_next, ResolutionOutcome};
use std::time::Duration;

pub struct FingerprintLookupJob {
    interval: Duration,
    suspend_when_idle: bool,
}

impl FingerprintLookupJob {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.lookup_interval_secs),
            suspend_when_idle: settings.suspend_when_idle,
        }
    }
}

impl BackgroundJob for FingerprintLookupJob {
    fn id(&self) -> &str {
        "fingerprint_lookup"
    }

    fn name(&self) -> &'static str {
        "Fingerprint Lookup"
    }

    fn description(&self) -> &'static str {
        "Resolve a computed fingerprint to a recording through AcoustID"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup, HookEvent::FingerprintsGenerated],
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
        let lookup = ctx.pipeline.lookup.as_deref().ok_or_else(|| {
            JobError::ExecutionFailed("no AcoustID API key configured".to_string())
        })?;

        let outcome = resolve_next(
            ctx.pipeline.beatmaps.as_ref(),
            ctx.pipeline.recordings.as_ref(),
            lookup,
        )
        .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        match outcome {
            ResolutionOutcome::Idle => Ok(JobOutcome::Idle),
            ResolutionOutcome::Resolved { .. } => {
                ctx.fire_hook(HookEvent::FingerprintsResolved);
                Ok(JobOutcome::Advanced(1))
            }
        }
    }
}
