//! Data models for the beatmap store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{BeatmapState, StateKind};

/// A rhythm-game site beatmaps are imported from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeatmapSite {
    pub id: i64,
    /// Short code, e.g. `bs` or `osu`.
    pub code: String,
    pub name: String,
    pub url_base: String,
    pub url_suffix: String,
}

impl BeatmapSite {
    /// Public page of a beatmap on this site.
    pub fn public_url(&self, external_id: &str) -> String {
        format!("{}{}{}", self.url_base, external_id, self.url_suffix)
    }
}

/// A beatmap as reported by a site, before it gets an id and a state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBeatmap {
    pub site_code: String,
    pub external_id: String,
    pub artist: String,
    pub title: String,
    pub choreographer: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    /// Seconds, as reported by the site.
    pub duration: Option<f64>,
    pub raw_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beatmap {
    pub id: i64,
    pub site_code: String,
    pub external_id: String,
    pub artist: String,
    pub title: String,
    pub choreographer: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub raw_metadata: Option<serde_json::Value>,
    pub state: BeatmapState,
    /// Logical timestamp (ms) of the last state write, used for FIFO selection.
    pub last_checked: i64,
    /// Unix seconds.
    pub created_at: i64,
}

/// A state change to commit, guarded on the state it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub beatmap_id: i64,
    pub from: StateKind,
    pub to: BeatmapState,
}

impl Transition {
    pub fn of(beatmap: &Beatmap, to: BeatmapState) -> Self {
        Transition {
            beatmap_id: beatmap.id,
            from: beatmap.state.kind(),
            to,
        }
    }
}

/// Outcome of [`super::BeatmapStore::repair_recording_links`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkRepairReport {
    /// Links moved from a merged recording to its surviving target.
    pub redirected: usize,
    /// Beatmaps whose recording disappeared and were degraded.
    pub detached: usize,
}
