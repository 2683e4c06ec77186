//! Which beatmap the fingerprint generator works on next.
//!
//! The policy is an ordered table. The first rule whose gates are all open
//! and whose state has a candidate wins. Beatmaps without a match come first;
//! string matches are only re-checked by fingerprint once nothing else is
//! queued, so they get upgraded in the background.

use anyhow::Result;

use crate::beatmap_store::{Beatmap, BeatmapStore, StateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRule {
    pub state: StateKind,
    /// The rule only applies while these states have no eligible beatmaps.
    pub only_when_empty: &'static [StateKind],
}

pub const FINGERPRINT_SELECTION: &[SelectionRule] = &[
    SelectionRule {
        state: StateKind::WaitingForFingerprint,
        only_when_empty: &[],
    },
    SelectionRule {
        state: StateKind::MatchedWithStringMultiple,
        only_when_empty: &[StateKind::WaitingForFingerprint, StateKind::HasFingerprint],
    },
    SelectionRule {
        state: StateKind::MatchedWithString,
        only_when_empty: &[StateKind::WaitingForFingerprint, StateKind::HasFingerprint],
    },
];

/// The least recently checked beatmap picked by `rules`, restricted to
/// `site_codes`. Gates are counted over the same sites.
pub fn select_next(
    store: &dyn BeatmapStore,
    rules: &[SelectionRule],
    site_codes: &[String],
) -> Result<Option<Beatmap>> {
    if site_codes.is_empty() {
        return Ok(None);
    }
    'rules: for rule in rules {
        for gate in rule.only_when_empty {
            if store.count_in_state(*gate, Some(site_codes))? > 0 {
                continue 'rules;
            }
        }
        if let Some(beatmap) = store
            .oldest_in_state(rule.state, Some(site_codes), 1)?
            .into_iter()
            .next()
        {
            return Ok(Some(beatmap));
        }
    }
    Ok(None)
}
