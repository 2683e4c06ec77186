use super::job::HookEvent;
use crate::pipeline::PipelineContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Context provided to jobs during execution.
///
/// Contains the pipeline's stores and collaborators, a cancellation token
/// for graceful shutdown handling, and a way to wake up downstream jobs.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub pipeline: Arc<PipelineContext>,

    hook_sender: mpsc::Sender<HookEvent>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        pipeline: Arc<PipelineContext>,
        hook_sender: mpsc::Sender<HookEvent>,
    ) -> Self {
        Self {
            cancellation_token,
            pipeline,
            hook_sender,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Same context with a different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Signals jobs listening for `event`. Never blocks: jobs run on blocking
    /// threads and a full queue already carries a wake-up.
    pub fn fire_hook(&self, event: HookEvent) {
        match self.hook_sender.try_send(event) {
            Ok(()) => debug!("Fired hook {}", event),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Hook queue full, dropping {}", event)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Scheduler gone, dropping {}", event)
            }
        }
    }
}
