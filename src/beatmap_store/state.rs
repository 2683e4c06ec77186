//! Match state of a beatmap and the evidence each state carries.
//!
//! Every state owns exactly the evidence that is meaningful for it, so an
//! invalid combination (say, a fingerprint match without a recording) cannot
//! be built in memory. [`BeatmapState::decode`] is the only door from the flat
//! database columns back into this type and rejects rows that break the
//! table below.
//!
//! | state                        | fingerprint | track_id | recording | error |
//! |------------------------------|-------------|----------|-----------|-------|
//! | INITIAL                      | -           | -        | -         | -     |
//! | MATCHED_WITH_STRING          | -           | -        | required  | -     |
//! | MATCHED_WITH_STRING_MULTIPLE | -           | -        | required  | -     |
//! | WAITING_FOR_FINGERPRINT      | -           | -        | optional  | -     |
//! | HAS_FINGERPRINT              | required    | -        | optional  | -     |
//! | MATCHED_WITH_FINGERPRINT     | required    | required | required  | -     |
//! | TOO_MANY_MATCHES             | required    | required | optional  | -     |
//! | NO_MATCH                     | required    | optional | optional  | -     |
//! | ERROR                        | optional    | optional | optional  | required |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Duration (seconds) and encoded fingerprint produced by `fpcalc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcousticFingerprint {
    pub duration: f64,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    Initial,
    MatchedWithString,
    MatchedWithStringMultiple,
    WaitingForFingerprint,
    HasFingerprint,
    MatchedWithFingerprint,
    TooManyMatches,
    NoMatch,
    Error,
}

impl StateKind {
    pub const ALL: [StateKind; 9] = [
        StateKind::Initial,
        StateKind::MatchedWithString,
        StateKind::MatchedWithStringMultiple,
        StateKind::WaitingForFingerprint,
        StateKind::HasFingerprint,
        StateKind::MatchedWithFingerprint,
        StateKind::TooManyMatches,
        StateKind::NoMatch,
        StateKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Initial => "INITIAL",
            StateKind::MatchedWithString => "MATCHED_WITH_STRING",
            StateKind::MatchedWithStringMultiple => "MATCHED_WITH_STRING_MULTIPLE",
            StateKind::WaitingForFingerprint => "WAITING_FOR_FINGERPRINT",
            StateKind::HasFingerprint => "HAS_FINGERPRINT",
            StateKind::MatchedWithFingerprint => "MATCHED_WITH_FINGERPRINT",
            StateKind::TooManyMatches => "TOO_MANY_MATCHES",
            StateKind::NoMatch => "NO_MATCH",
            StateKind::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        StateKind::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// States no pipeline stage will pick up again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateKind::MatchedWithFingerprint
                | StateKind::TooManyMatches
                | StateKind::NoMatch
                | StateKind::Error
        )
    }

    fn layout(&self) -> [Slot; 4] {
        use Slot::*;
        // fingerprint, track_id, recording, error
        match self {
            StateKind::Initial => [Absent, Absent, Absent, Absent],
            StateKind::MatchedWithString | StateKind::MatchedWithStringMultiple => {
                [Absent, Absent, Required, Absent]
            }
            StateKind::WaitingForFingerprint => [Absent, Absent, Optional, Absent],
            StateKind::HasFingerprint => [Required, Absent, Optional, Absent],
            StateKind::MatchedWithFingerprint => [Required, Required, Required, Absent],
            StateKind::TooManyMatches => [Required, Required, Optional, Absent],
            StateKind::NoMatch => [Required, Optional, Optional, Absent],
            StateKind::Error => [Optional, Optional, Optional, Required],
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Required,
    Optional,
    Absent,
}

const FIELD_NAMES: [&str; 4] = ["fingerprint", "track_id", "recording", "error_message"];

#[derive(Debug, Error, PartialEq)]
pub enum InvalidStateError {
    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("state {state} requires {field}")]
    Missing {
        state: StateKind,
        field: &'static str,
    },

    #[error("state {state} must not carry {field}")]
    Unexpected {
        state: StateKind,
        field: &'static str,
    },

    #[error("state {0} has a fingerprint without a duration, or the other way round")]
    PartialFingerprint(StateKind),
}

/// Evidence kept by an errored beatmap, whatever it had gathered before.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    pub fingerprint: Option<AcousticFingerprint>,
    pub track_id: Option<String>,
    pub recording: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeatmapState {
    Initial,
    MatchedWithString {
        recording: String,
    },
    MatchedWithStringMultiple {
        recording: String,
    },
    WaitingForFingerprint {
        recording: Option<String>,
    },
    HasFingerprint {
        fingerprint: AcousticFingerprint,
        recording: Option<String>,
    },
    MatchedWithFingerprint {
        fingerprint: AcousticFingerprint,
        track_id: String,
        recording: String,
    },
    TooManyMatches {
        fingerprint: AcousticFingerprint,
        track_id: String,
        recording: Option<String>,
    },
    NoMatch {
        fingerprint: AcousticFingerprint,
        track_id: Option<String>,
        recording: Option<String>,
    },
    Error {
        evidence: Evidence,
        reason: String,
    },
}

/// Flat column form of a [`BeatmapState`], as stored in the `beatmaps` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredState {
    pub state: String,
    pub fingerprint: Option<String>,
    pub fingerprint_duration: Option<f64>,
    pub track_id: Option<String>,
    pub recording_gid: Option<String>,
    pub error_message: Option<String>,
}

impl BeatmapState {
    pub fn kind(&self) -> StateKind {
        match self {
            BeatmapState::Initial => StateKind::Initial,
            BeatmapState::MatchedWithString { .. } => StateKind::MatchedWithString,
            BeatmapState::MatchedWithStringMultiple { .. } => StateKind::MatchedWithStringMultiple,
            BeatmapState::WaitingForFingerprint { .. } => StateKind::WaitingForFingerprint,
            BeatmapState::HasFingerprint { .. } => StateKind::HasFingerprint,
            BeatmapState::MatchedWithFingerprint { .. } => StateKind::MatchedWithFingerprint,
            BeatmapState::TooManyMatches { .. } => StateKind::TooManyMatches,
            BeatmapState::NoMatch { .. } => StateKind::NoMatch,
            BeatmapState::Error { .. } => StateKind::Error,
        }
    }

    pub fn recording(&self) -> Option<&str> {
        match self {
            BeatmapState::Initial => None,
            BeatmapState::MatchedWithString { recording }
            | BeatmapState::MatchedWithStringMultiple { recording }
            | BeatmapState::MatchedWithFingerprint { recording, .. } => Some(recording),
            BeatmapState::WaitingForFingerprint { recording }
            | BeatmapState::HasFingerprint { recording, .. }
            | BeatmapState::TooManyMatches { recording, .. }
            | BeatmapState::NoMatch { recording, .. } => recording.as_deref(),
            BeatmapState::Error { evidence, .. } => evidence.recording.as_deref(),
        }
    }

    pub fn fingerprint(&self) -> Option<&AcousticFingerprint> {
        match self {
            BeatmapState::HasFingerprint { fingerprint, .. }
            | BeatmapState::MatchedWithFingerprint { fingerprint, .. }
            | BeatmapState::TooManyMatches { fingerprint, .. }
            | BeatmapState::NoMatch { fingerprint, .. } => Some(fingerprint),
            BeatmapState::Error { evidence, .. } => evidence.fingerprint.as_ref(),
            _ => None,
        }
    }

    pub fn track_id(&self) -> Option<&str> {
        match self {
            BeatmapState::MatchedWithFingerprint { track_id, .. }
            | BeatmapState::TooManyMatches { track_id, .. } => Some(track_id),
            BeatmapState::NoMatch { track_id, .. } => track_id.as_deref(),
            BeatmapState::Error { evidence, .. } => evidence.track_id.as_deref(),
            _ => None,
        }
    }

    pub fn evidence(&self) -> Evidence {
        Evidence {
            fingerprint: self.fingerprint().cloned(),
            track_id: self.track_id().map(str::to_string),
            recording: self.recording().map(str::to_string),
        }
    }

    /// Moves to ERROR keeping whatever evidence was already gathered.
    pub fn into_error(self, reason: impl Into<String>) -> BeatmapState {
        BeatmapState::Error {
            evidence: self.evidence(),
            reason: reason.into(),
        }
    }

    /// Drops the linked recording, degrading to the closest state that is
    /// still valid without one.
    pub fn without_recording(self) -> BeatmapState {
        match self {
            BeatmapState::Initial => BeatmapState::Initial,
            BeatmapState::MatchedWithString { .. }
            | BeatmapState::MatchedWithStringMultiple { .. }
            | BeatmapState::WaitingForFingerprint { .. } => {
                BeatmapState::WaitingForFingerprint { recording: None }
            }
            BeatmapState::HasFingerprint { fingerprint, .. } => BeatmapState::HasFingerprint {
                fingerprint,
                recording: None,
            },
            BeatmapState::MatchedWithFingerprint {
                fingerprint,
                track_id,
                ..
            } => BeatmapState::NoMatch {
                fingerprint,
                track_id: Some(track_id),
                recording: None,
            },
            BeatmapState::TooManyMatches {
                fingerprint,
                track_id,
                ..
            } => BeatmapState::TooManyMatches {
                fingerprint,
                track_id,
                recording: None,
            },
            BeatmapState::NoMatch {
                fingerprint,
                track_id,
                ..
            } => BeatmapState::NoMatch {
                fingerprint,
                track_id,
                recording: None,
            },
            BeatmapState::Error {
                mut evidence,
                reason,
            } => {
                evidence.recording = None;
                BeatmapState::Error { evidence, reason }
            }
        }
    }

    pub fn encode(&self) -> StoredState {
        let fingerprint = self.fingerprint();
        StoredState {
            state: self.kind().as_str().to_string(),
            fingerprint: fingerprint.map(|f| f.fingerprint.clone()),
            fingerprint_duration: fingerprint.map(|f| f.duration),
            track_id: self.track_id().map(str::to_string),
            recording_gid: self.recording().map(str::to_string),
            error_message: match self {
                BeatmapState::Error { reason, .. } => Some(reason.clone()),
                _ => None,
            },
        }
    }

    pub fn decode(stored: StoredState) -> Result<BeatmapState, InvalidStateError> {
        let kind = StateKind::from_str(&stored.state)
            .ok_or_else(|| InvalidStateError::UnknownState(stored.state.clone()))?;

        let fingerprint = match (stored.fingerprint, stored.fingerprint_duration) {
            (Some(fingerprint), Some(duration)) => Some(AcousticFingerprint {
                duration,
                fingerprint,
            }),
            (None, None) => None,
            _ => return Err(InvalidStateError::PartialFingerprint(kind)),
        };

        let present = [
            fingerprint.is_some(),
            stored.track_id.is_some(),
            stored.recording_gid.is_some(),
            stored.error_message.is_some(),
        ];
        for ((slot, present), field) in kind.layout().iter().zip(present).zip(FIELD_NAMES) {
            match (slot, present) {
                (Slot::Required, false) => {
                    return Err(InvalidStateError::Missing { state: kind, field })
                }
                (Slot::Absent, true) => {
                    return Err(InvalidStateError::Unexpected { state: kind, field })
                }
                _ => {}
            }
        }

        let missing = |field: &'static str| InvalidStateError::Missing { state: kind, field };
        let recording = stored.recording_gid;
        let track_id = stored.track_id;
        Ok(match kind {
            StateKind::Initial => BeatmapState::Initial,
            StateKind::MatchedWithString => BeatmapState::MatchedWithString {
                recording: recording.ok_or_else(|| missing("recording"))?,
            },
            StateKind::MatchedWithStringMultiple => BeatmapState::MatchedWithStringMultiple {
                recording: recording.ok_or_else(|| missing("recording"))?,
            },
            StateKind::WaitingForFingerprint => BeatmapState::WaitingForFingerprint { recording },
            StateKind::HasFingerprint => BeatmapState::HasFingerprint {
                fingerprint: fingerprint.ok_or_else(|| missing("fingerprint"))?,
                recording,
            },
            StateKind::MatchedWithFingerprint => BeatmapState::MatchedWithFingerprint {
                fingerprint: fingerprint.ok_or_else(|| missing("fingerprint"))?,
                track_id: track_id.ok_or_else(|| missing("track_id"))?,
                recording: recording.ok_or_else(|| missing("recording"))?,
            },
            StateKind::TooManyMatches => BeatmapState::TooManyMatches {
                fingerprint: fingerprint.ok_or_else(|| missing("fingerprint"))?,
                track_id: track_id.ok_or_else(|| missing("track_id"))?,
                recording,
            },
            StateKind::NoMatch => BeatmapState::NoMatch {
                fingerprint: fingerprint.ok_or_else(|| missing("fingerprint"))?,
                track_id,
                recording,
            },
            StateKind::Error => BeatmapState::Error {
                evidence: Evidence {
                    fingerprint,
                    track_id,
                    recording,
                },
                reason: stored
                    .error_message
                    .ok_or_else(|| missing("error_message"))?,
            },
        })
    }
}
