//! The long-running pipeline: the stage jobs under one scheduler, with an
//! explicit start/stop lifecycle.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::actions::{self, ActionResult};
use super::PipelineContext;
use crate::beatmap_store::BeatmapStore;
use crate::background_jobs::jobs::{
    FingerprintGenerationJob, FingerprintLookupJob, SiteImportJob, StringMatchJob,
};
use crate::background_jobs::{
    create_scheduler, BackgroundJob, HookEvent, JobError, JobInfo, SchedulerHandle,
};

const HOOK_QUEUE_SIZE: usize = 100;

pub struct PipelineService;

impl PipelineService {
    /// Registers the stage jobs and starts the scheduler on the current
    /// runtime.
    pub async fn start(ctx: PipelineContext) -> PipelineHandle {
        let jobs = pipeline_jobs(&ctx);
        let ctx = Arc::new(ctx);

        let (hook_sender, hook_receiver) = mpsc::channel(HOOK_QUEUE_SIZE);
        let shutdown_token = CancellationToken::new();
        let (mut scheduler, scheduler_handle) = create_scheduler(
            hook_sender,
            hook_receiver,
            shutdown_token.clone(),
            Arc::clone(&ctx),
        );
        for job in jobs {
            scheduler.register_job(job).await;
        }

        let task = tokio::spawn(async move {
            scheduler.run().await;
        });
        info!("Pipeline started");

        PipelineHandle {
            ctx,
            scheduler: scheduler_handle,
            shutdown_token,
            task,
        }
    }
}

/// The stage jobs for the configured sites and services.
pub fn pipeline_jobs(ctx: &PipelineContext) -> Vec<Arc<dyn BackgroundJob>> {
    let settings = &ctx.settings;
    let mut jobs: Vec<Arc<dyn BackgroundJob>> = ctx
        .sites
        .adapters()
        .map(|site| Arc::new(SiteImportJob::new(site.code(), settings)) as Arc<dyn BackgroundJob>)
        .collect();

    jobs.push(Arc::new(StringMatchJob::new(settings)));
    jobs.push(Arc::new(FingerprintGenerationJob::new(settings)));
    if ctx.lookup.is_some() {
        jobs.push(Arc::new(FingerprintLookupJob::new(settings)));
    } else {
        warn!("Fingerprint lookup job not registered, no AcoustID API key");
    }
    jobs
}

/// Controls a running pipeline.
pub struct PipelineHandle {
    ctx: Arc<PipelineContext>,
    scheduler: SchedulerHandle,
    shutdown_token: CancellationToken,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.list_jobs().await
    }

    /// Runs a job now, waking it if it was parked.
    pub async fn trigger(&self, job_id: &str) -> Result<(), JobError> {
        self.scheduler.trigger_job(job_id).await
    }

    pub async fn reset_match(&self, beatmap_id: i64) -> Result<ActionResult> {
        self.run_action(beatmap_id, actions::reset_match).await
    }

    pub async fn clear_match(&self, beatmap_id: i64) -> Result<ActionResult> {
        self.run_action(beatmap_id, actions::clear_match).await
    }

    async fn run_action(
        &self,
        beatmap_id: i64,
        action: fn(&dyn BeatmapStore, i64) -> Result<ActionResult>,
    ) -> Result<ActionResult> {
        let ctx = Arc::clone(&self.ctx);
        let result = tokio::task::spawn_blocking(move || action(ctx.beatmaps.as_ref(), beatmap_id))
            .await
            .context("Beatmap action panicked")??;

        if let Err(e) = self.scheduler.fire_hook(HookEvent::MatchesReset).await {
            warn!("Could not wake the pipeline after changing beatmap {}: {}", beatmap_id, e);
        }
        Ok(result)
    }

    /// Stops scheduling and waits for in-flight stage runs to finish.
    pub async fn stop(self) -> Result<()> {
        info!("Stopping pipeline...");
        self.shutdown_token.cancel();
        self.task.await.context("Scheduler task panicked")?;
        info!("Pipeline stopped");
        Ok(())
    }
}
