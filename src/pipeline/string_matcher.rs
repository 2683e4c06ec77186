//! Linking freshly imported beatmaps to recordings by title and artist.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::beatmap_store::{BeatmapState, BeatmapStore, StateKind, Transition};
use crate::recording_store::RecordingStore;

/// Two candidates are enough to tell a unique match from an ambiguous one.
const CANDIDATE_LIMIT: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StringMatchReport {
    pub processed: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
}

/// Matches up to `batch_size` INITIAL beatmaps, oldest first, and commits the
/// whole batch in one transaction. A failing query aborts the batch before
/// anything is written.
pub fn match_with_string(
    beatmaps: &dyn BeatmapStore,
    recordings: &dyn RecordingStore,
    batch_size: usize,
) -> Result<StringMatchReport> {
    let batch = beatmaps.oldest_in_state(StateKind::Initial, None, batch_size)?;
    let mut report = StringMatchReport::default();
    if batch.is_empty() {
        return Ok(report);
    }

    let mut transitions = Vec::with_capacity(batch.len());
    for beatmap in &batch {
        let candidates = recordings.find_by_title_and_artist(
            &beatmap.title,
            &beatmap.artist,
            beatmap.duration,
            CANDIDATE_LIMIT,
        )?;
        let next = match candidates.as_slice() {
            [] => {
                report.unmatched += 1;
                BeatmapState::WaitingForFingerprint { recording: None }
            }
            [only] => {
                report.matched += 1;
                BeatmapState::MatchedWithString {
                    recording: only.gid.clone(),
                }
            }
            [best, ..] => {
                report.ambiguous += 1;
                BeatmapState::MatchedWithStringMultiple {
                    recording: best.gid.clone(),
                }
            }
        };
        debug!(
            "Beatmap {} '{}' by '{}' -> {}",
            beatmap.id,
            beatmap.title,
            beatmap.artist,
            next.kind()
        );
        transitions.push(Transition::of(beatmap, next));
    }

    report.processed = beatmaps.apply_transitions(&transitions)?;
    info!(
        "Matched {} beatmaps using string ({} ambiguous, {} need a fingerprint)",
        report.matched, report.ambiguous, report.unmatched
    );
    Ok(report)
}
