//! Operator actions on single beatmaps, and the link recovery procedure.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::beatmap_store::{BeatmapState, BeatmapStore, LinkRepairReport, StateKind, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub beatmap_id: i64,
    pub from: StateKind,
    pub to: StateKind,
}

/// Throws away all match evidence and queues the beatmap for fingerprinting
/// again. This is also how ERROR beatmaps are retried.
pub fn reset_match(store: &dyn BeatmapStore, beatmap_id: i64) -> Result<ActionResult> {
    apply(store, beatmap_id, |_| BeatmapState::WaitingForFingerprint {
        recording: None,
    })
}

/// Drops a wrong recording link. States that cannot exist without a
/// recording fall back to the closest state that can.
pub fn clear_match(store: &dyn BeatmapStore, beatmap_id: i64) -> Result<ActionResult> {
    apply(store, beatmap_id, BeatmapState::without_recording)
}

fn apply(
    store: &dyn BeatmapStore,
    beatmap_id: i64,
    change: impl FnOnce(BeatmapState) -> BeatmapState,
) -> Result<ActionResult> {
    let beatmap = store
        .get_beatmap(beatmap_id)?
        .with_context(|| format!("Beatmap {} not found", beatmap_id))?;
    let from = beatmap.state.kind();
    let next = change(beatmap.state.clone());
    let to = next.kind();

    if store.apply_transitions(&[Transition::of(&beatmap, next)])? == 0 {
        bail!(
            "Beatmap {} left {} while the change was being applied, try again",
            beatmap_id,
            from
        );
    }
    info!("Beatmap {}: {} -> {}", beatmap_id, from, to);
    Ok(ActionResult {
        beatmap_id,
        from,
        to,
    })
}

/// Recovers from canonical recordings being renumbered under the beatmaps:
/// merged recordings are followed through the redirect table, and links to
/// recordings that vanished are dropped.
pub fn repair_links(store: &dyn BeatmapStore) -> Result<LinkRepairReport> {
    let report = store.repair_recording_links()?;
    if report.detached > 0 {
        warn!(
            "{} beatmaps lost their recording and need to be matched again",
            report.detached
        );
    }
    Ok(report)
}
