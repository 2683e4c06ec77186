//! Acoustic fingerprint generation and lookup.

mod acoustid;
mod engine;

pub use acoustid::{
    interpret_results, AcoustIdClient, FingerprintLookup, LookupError, LookupOutcome,
    LookupRecording, LookupResponse, LookupResult,
};
pub use engine::{FingerprintEngine, FingerprintError, FpcalcEngine};
