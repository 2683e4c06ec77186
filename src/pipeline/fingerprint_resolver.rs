//! Looking fingerprints up and linking the recording they belong to.

use anyhow::{bail, Result};
use tracing::{debug, error, info, warn};

use super::StageError;
use crate::beatmap_store::{
    AcousticFingerprint, BeatmapState, BeatmapStore, StateKind, Transition, MAX_REDIRECT_HOPS,
};
use crate::fingerprint::{interpret_results, FingerprintLookup, LookupOutcome};
use crate::recording_store::{RecordingStore, RedirectResolution};

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Idle,
    Resolved { beatmap_id: i64, state: StateKind },
}

/// Resolves the oldest HAS_FINGERPRINT beatmap.
pub fn resolve_next(
    store: &dyn BeatmapStore,
    recordings: &dyn RecordingStore,
    lookup: &dyn FingerprintLookup,
) -> Result<ResolutionOutcome> {
    let Some(beatmap) = store
        .oldest_in_state(StateKind::HasFingerprint, None, 1)?
        .into_iter()
        .next()
    else {
        return Ok(ResolutionOutcome::Idle);
    };
    let BeatmapState::HasFingerprint {
        fingerprint,
        recording,
    } = &beatmap.state
    else {
        bail!(
            "beatmap {} was selected as {} but is {}",
            beatmap.id,
            StateKind::HasFingerprint,
            beatmap.state.kind()
        );
    };

    let next = match resolve(beatmap.id, fingerprint, recording.clone(), recordings, lookup) {
        Ok(next) => next,
        Err(e) => {
            error!(
                beatmap_id = beatmap.id,
                site = %beatmap.site_code,
                external_id = %beatmap.external_id,
                "Error resolving fingerprint: {}",
                e
            );
            beatmap.state.clone().into_error(e.to_string())
        }
    };
    let state = next.kind();
    store.apply_transitions(&[Transition::of(&beatmap, next)])?;
    Ok(ResolutionOutcome::Resolved {
        beatmap_id: beatmap.id,
        state,
    })
}

fn resolve(
    beatmap_id: i64,
    fingerprint: &AcousticFingerprint,
    string_match: Option<String>,
    recordings: &dyn RecordingStore,
    lookup: &dyn FingerprintLookup,
) -> Result<BeatmapState, StageError> {
    let results = lookup.lookup(fingerprint)?;
    if results.len() > 1 {
        warn!(
            "Beatmap {} has {} track ids, using the first",
            beatmap_id,
            results.len()
        );
    }

    let fingerprint = fingerprint.clone();
    let next = match interpret_results(&results) {
        LookupOutcome::NoResults => {
            debug!("Beatmap {} fingerprint is unknown", beatmap_id);
            BeatmapState::NoMatch {
                fingerprint,
                track_id: None,
                recording: string_match,
            }
        }
        LookupOutcome::NoRecordings { track_id } => {
            debug!("Track {} of beatmap {} has no recordings", track_id, beatmap_id);
            BeatmapState::NoMatch {
                fingerprint,
                track_id: Some(track_id),
                recording: string_match,
            }
        }
        LookupOutcome::SingleRecording {
            track_id,
            recording_gid,
        } => match recordings
            .resolve_gid(&recording_gid, MAX_REDIRECT_HOPS)
            .map_err(StageError::Recordings)?
        {
            RedirectResolution::Resolved(gid) => {
                if gid != recording_gid {
                    debug!("Recording {} was merged into {}", recording_gid, gid);
                }
                info!("Matched beatmap {} with recording {}", beatmap_id, gid);
                BeatmapState::MatchedWithFingerprint {
                    fingerprint,
                    track_id,
                    recording: gid,
                }
            }
            unresolved => {
                warn!(
                    "Beatmap {} matched track {} whose recording {} cannot be resolved locally ({:?})",
                    beatmap_id, track_id, recording_gid, unresolved
                );
                BeatmapState::NoMatch {
                    fingerprint,
                    track_id: Some(track_id),
                    recording: string_match,
                }
            }
        },
        LookupOutcome::MultipleRecordings { track_id, count } => {
            debug!(
                "Track {} of beatmap {} has {} recordings",
                track_id, beatmap_id, count
            );
            BeatmapState::TooManyMatches {
                fingerprint,
                track_id,
                recording: string_match,
            }
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{fingerprint, lookup_result, Fixture, TableLookup};

    fn fixture(lookup: TableLookup) -> Fixture {
        let fixture = Fixture::new(vec![], Some(lookup));
        fixture.add_recording(1, "rec", "Song", "Band");
        fixture.add_recording(2, "other", "Other", "Band");
        fixture
    }

    fn pending(fixture: &Fixture, fp: &str, recording: Option<&str>) -> i64 {
        fixture.beatmap_in(
            "bs",
            fp,
            BeatmapState::HasFingerprint {
                fingerprint: fingerprint(fp),
                recording: recording.map(str::to_string),
            },
        )
    }

    fn run(fixture: &Fixture) -> ResolutionOutcome {
        resolve_next(
            fixture.ctx.beatmaps.as_ref(),
            fixture.ctx.recordings.as_ref(),
            fixture.ctx.lookup.as_deref().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn empty_results_mean_no_match() {
        let fixture = fixture(TableLookup::default().answer("fp", vec![]));
        let id = pending(&fixture, "fp", None);

        assert_eq!(
            run(&fixture),
            ResolutionOutcome::Resolved {
                beatmap_id: id,
                state: StateKind::NoMatch
            }
        );
        let state = fixture.state_of(id);
        assert_eq!(state.recording(), None);
        assert_eq!(state.track_id(), None);
    }

    #[test]
    fn single_recording_matches() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["rec"])]),
        );
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        assert_eq!(
            fixture.state_of(id),
            BeatmapState::MatchedWithFingerprint {
                fingerprint: fingerprint("fp"),
                track_id: "track".to_string(),
                recording: "rec".to_string(),
            }
        );
    }

    #[test]
    fn fingerprint_match_replaces_string_match() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["other"])]),
        );
        let id = pending(&fixture, "fp", Some("rec"));

        run(&fixture);
        assert_eq!(fixture.state_of(id).recording(), Some("other"));
    }

    #[test]
    fn follows_redirects() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["stale"])]),
        );
        fixture.sql(
            "INSERT INTO recording_gid_redirect (gid, new_id) VALUES ('stale', 1);",
        );
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        let state = fixture.state_of(id);
        assert_eq!(state.kind(), StateKind::MatchedWithFingerprint);
        assert_eq!(state.recording(), Some("rec"));
    }

    /// Merges `stale` through `hops` redirects; the last recording is `hop-<hops>`.
    fn redirect_chain(fixture: &Fixture, hops: i64) {
        let mut from = "stale".to_string();
        for hop in 1..=hops {
            let gid = format!("hop-{hop}");
            fixture.add_recording(100 + hop, &gid, "Song", "Band");
            fixture.sql(&format!(
                "INSERT INTO recording_gid_redirect (gid, new_id) VALUES ('{from}', {});",
                100 + hop
            ));
            from = gid;
        }
    }

    #[test]
    fn follows_redirect_chain_up_to_the_hop_limit() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["stale"])]),
        );
        redirect_chain(&fixture, MAX_REDIRECT_HOPS as i64);
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        let state = fixture.state_of(id);
        assert_eq!(state.kind(), StateKind::MatchedWithFingerprint);
        assert_eq!(state.recording(), Some(format!("hop-{MAX_REDIRECT_HOPS}").as_str()));
    }

    #[test]
    fn redirect_chain_past_the_hop_limit_is_no_match() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["stale"])]),
        );
        redirect_chain(&fixture, MAX_REDIRECT_HOPS as i64 + 1);
        let id = pending(&fixture, "fp", Some("rec"));

        run(&fixture);
        assert_eq!(
            fixture.state_of(id),
            BeatmapState::NoMatch {
                fingerprint: fingerprint("fp"),
                track_id: Some("track".to_string()),
                recording: Some("rec".to_string()),
            }
        );
    }

    #[test]
    fn unknown_recording_is_no_match() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["unknown"])]),
        );
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        let state = fixture.state_of(id);
        assert_eq!(state.kind(), StateKind::NoMatch);
        assert_eq!(state.track_id(), Some("track"));
        assert_eq!(state.recording(), None);
    }

    #[test]
    fn track_without_recordings_is_no_match() {
        let fixture = fixture(TableLookup::default().answer("fp", vec![lookup_result("track", &[])]));
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        assert_eq!(
            fixture.state_of(id),
            BeatmapState::NoMatch {
                fingerprint: fingerprint("fp"),
                track_id: Some("track".to_string()),
                recording: None,
            }
        );
    }

    #[test]
    fn several_recordings_are_too_many() {
        let fixture = fixture(
            TableLookup::default().answer("fp", vec![lookup_result("track", &["rec", "other"])]),
        );
        let id = pending(&fixture, "fp", Some("rec"));

        run(&fixture);
        assert_eq!(
            fixture.state_of(id),
            BeatmapState::TooManyMatches {
                fingerprint: fingerprint("fp"),
                track_id: "track".to_string(),
                recording: Some("rec".to_string()),
            }
        );
    }

    #[test]
    fn service_error_moves_to_error_keeping_fingerprint() {
        let fixture = fixture(TableLookup::default());
        let id = pending(&fixture, "fp", None);

        run(&fixture);
        match fixture.state_of(id) {
            BeatmapState::Error { evidence, reason } => {
                assert_eq!(evidence.fingerprint, Some(fingerprint("fp")));
                assert!(reason.contains("rate limit exceeded"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(run(&fixture), ResolutionOutcome::Idle);
    }

    #[test]
    fn oldest_first() {
        let fixture = fixture(
            TableLookup::default()
                .answer("a", vec![])
                .answer("b", vec![]),
        );
        let first = pending(&fixture, "a", None);
        let second = pending(&fixture, "b", None);

        assert!(matches!(run(&fixture), ResolutionOutcome::Resolved { beatmap_id, .. } if beatmap_id == first));
        assert!(matches!(run(&fixture), ResolutionOutcome::Resolved { beatmap_id, .. } if beatmap_id == second));
    }
}
