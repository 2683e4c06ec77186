//! Beatmap Linker Library
//!
//! Links rhythm game beatmaps to canonical music recordings, by string
//! matching first and acoustic fingerprints second.

pub mod background_jobs;
pub mod beatmap_store;
pub mod config;
pub mod fingerprint;
pub mod pipeline;
pub mod recording_store;
pub mod sites;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use beatmap_store::{BeatmapState, BeatmapStore, SqliteBeatmapStore, StateKind};
pub use config::AppConfig;
pub use pipeline::{PipelineContext, PipelineHandle, PipelineService};
