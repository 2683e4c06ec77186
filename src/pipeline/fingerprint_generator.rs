//! Downloading a beatmap's song and fingerprinting it.

use anyhow::Result;
use std::io::Write;
use tracing::{debug, error, info};

use super::selection::{select_next, FINGERPRINT_SELECTION};
use super::StageError;
use crate::beatmap_store::{AcousticFingerprint, Beatmap, BeatmapState, BeatmapStore, Transition};
use crate::fingerprint::FingerprintEngine;
use crate::sites::SiteRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// No beatmap was eligible.
    Idle,
    Fingerprinted { beatmap_id: i64 },
    Failed { beatmap_id: i64, reason: String },
}

/// Fingerprints the next beatmap picked by [`FINGERPRINT_SELECTION`].
///
/// A failure moves the beatmap to ERROR. The state is only written once the
/// whole download and fingerprint sequence is over.
pub fn generate_next(
    store: &dyn BeatmapStore,
    sites: &SiteRegistry,
    engine: &dyn FingerprintEngine,
) -> Result<GenerationOutcome> {
    let Some(beatmap) = select_next(store, FINGERPRINT_SELECTION, &sites.downloadable_codes())?
    else {
        return Ok(GenerationOutcome::Idle);
    };
    debug!(
        "Generating fingerprint for beatmap {} ({})",
        beatmap.id,
        beatmap.state.kind()
    );

    let (next, outcome) = match fingerprint_beatmap(&beatmap, sites, engine) {
        Ok(fingerprint) => {
            info!(
                "Fingerprinted beatmap {} ({:.0}s of audio)",
                beatmap.id, fingerprint.duration
            );
            let next = BeatmapState::HasFingerprint {
                fingerprint,
                recording: beatmap.state.recording().map(str::to_string),
            };
            (
                next,
                GenerationOutcome::Fingerprinted {
                    beatmap_id: beatmap.id,
                },
            )
        }
        Err(e) => {
            error!(
                beatmap_id = beatmap.id,
                site = %beatmap.site_code,
                external_id = %beatmap.external_id,
                "Error generating fingerprint: {}",
                e
            );
            let reason = e.to_string();
            (
                beatmap.state.clone().into_error(reason.clone()),
                GenerationOutcome::Failed {
                    beatmap_id: beatmap.id,
                    reason,
                },
            )
        }
    };

    store.apply_transitions(&[Transition::of(&beatmap, next)])?;
    Ok(outcome)
}

fn fingerprint_beatmap(
    beatmap: &Beatmap,
    sites: &SiteRegistry,
    engine: &dyn FingerprintEngine,
) -> Result<AcousticFingerprint, StageError> {
    let adapter = sites
        .get(&beatmap.site_code)
        .ok_or_else(|| StageError::UnknownSite(beatmap.site_code.clone()))?;
    let audio = {
        let package = adapter.download_package(beatmap)?;
        adapter.extract_audio(&package)?
    };

    // Removed when dropped, whatever happens below
    let mut file = tempfile::Builder::new()
        .prefix("beatmap-audio-")
        .suffix(&audio.disk_suffix())
        .tempfile()?;
    file.write_all(&audio.bytes)?;
    file.flush()?;

    Ok(engine.fingerprint(file.path())?)
}
