//! The matching pipeline stages.
//!
//! Every stage is a plain synchronous function over a [`PipelineContext`]. The
//! background jobs call them on blocking threads and the admin CLI calls them
//! directly.

pub mod actions;
mod context;
pub mod fingerprint_generator;
pub mod fingerprint_resolver;
pub mod importer;
pub mod selection;
mod service;
pub mod string_matcher;
#[cfg(test)]
pub(crate) mod test_support;

pub use context::PipelineContext;
pub use service::{pipeline_jobs, PipelineHandle, PipelineService};

use thiserror::Error;

use crate::fingerprint::{FingerprintError, LookupError};
use crate::sites::{PackageError, SiteError};

/// Why a single beatmap could not be advanced. The message ends up as the
/// reason of the beatmap's ERROR state.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("no adapter configured for site '{0}'")]
    UnknownSite(String),

    #[error("download failed: {0}")]
    Site(#[from] SiteError),

    #[error("unpacking failed: {0}")]
    Package(#[from] PackageError),

    #[error("fingerprinting failed: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("could not stage audio on disk: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording database error: {0}")]
    Recordings(anyhow::Error),
}
