//! Periodic import of new beatmaps from one site.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule, ShutdownBehavior},
};
use crate::config::PipelineSettings;
use crate::pipeline::importer::import_new;
use std::time::Duration;

/// Imports new beatmaps from one site. One instance is registered per
/// configured site.
pub struct SiteImportJob {
    id: String,
    site_code: &'static str,
    interval: Duration,
    jitter: Duration,
    max_pages: usize,
}

impl SiteImportJob {
    pub fn new(site_code: &'static str, settings: &PipelineSettings) -> Self {
        Self {
            id: format!("import_{}", site_code),
            site_code,
            interval: Duration::from_secs(settings.import_interval_secs),
            jitter: Duration::from_secs(settings.import_jitter_secs),
            max_pages: settings.import_max_pages,
        }
    }
}

impl BackgroundJob for SiteImportJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &'static str {
        "Site Import"
    }

    fn description(&self) -> &'static str {
        "Import beatmaps published since the last import"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn jitter(&self) -> Option<Duration> {
        Some(self.jitter)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let adapter = ctx.pipeline.sites.get(self.site_code).ok_or_else(|| {
            JobError::ExecutionFailed(format!("site {} is not configured", self.site_code))
        })?;

        let report = import_new(ctx.pipeline.beatmaps.as_ref(), adapter.as_ref(), self.max_pages)
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        if report.imported == 0 {
            return Ok(JobOutcome::Idle);
        }
        ctx.fire_hook(HookEvent::BeatmapsImported);
        Ok(JobOutcome::Advanced(report.imported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_metadata() {
        let settings = PipelineSettings::default();
        let job = SiteImportJob::new("bs", &settings);

        assert_eq!(job.id(), "import_bs");
        assert_eq!(job.jitter(), Some(Duration::from_secs(60)));
        assert!(!job.suspend_when_idle());
        assert_eq!(
            job.schedule(),
            JobSchedule::Combined {
                interval: Some(Duration::from_secs(3600)),
                hooks: vec![HookEvent::OnStartup],
            }
        );
    }
}
