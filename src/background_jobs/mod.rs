//! Background job scheduling and execution system.
//!
//! Runs the pipeline stages periodically and on hook events, on blocking
//! threads bounded by a worker pool.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, HookEvent, JobError, JobOutcome, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
