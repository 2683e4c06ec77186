//! Beatmap persistence.
//!
//! Owns the `beatmaps` and `sites` tables and the match state machine that
//! lives on each beatmap row.

mod models;
mod schema;
mod state;
mod store;

pub use models::{Beatmap, BeatmapSite, LinkRepairReport, NewBeatmap, Transition};
pub use schema::{BEATMAP_DB_VERSIONED_SCHEMAS, SEED_SITES};
pub use state::{
    AcousticFingerprint, BeatmapState, Evidence, InvalidStateError, StateKind, StoredState,
};
pub use store::{BeatmapStore, SqliteBeatmapStore, MAX_REDIRECT_HOPS};
