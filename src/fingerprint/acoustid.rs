//! AcoustID fingerprint lookup.
//!
//! Rate limited to 3 requests per second per AcoustID API policy.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::beatmap_store::AcousticFingerprint;

const ACOUSTID_LOOKUP_URL: &str = "https://api.acoustid.org/v2/lookup";
const RATE_LIMIT_INTERVAL: Duration = Duration::from_millis(334);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup service returned status '{status}': {message}")]
    Service { status: String, message: String },

    #[error("results not included in lookup response")]
    MissingResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupResponse {
    pub status: String,
    pub results: Option<Vec<LookupResult>>,
    pub error: Option<LookupErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupResult {
    /// AcoustID track id.
    pub id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub recordings: Vec<LookupRecording>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupRecording {
    /// Canonical recording gid.
    pub id: String,
}

impl LookupResponse {
    /// Checks the envelope and hands back the results.
    pub fn into_results(self) -> Result<Vec<LookupResult>, LookupError> {
        if self.status != "ok" {
            return Err(LookupError::Service {
                status: self.status,
                message: self.error.map(|e| e.message).unwrap_or_default(),
            });
        }
        self.results.ok_or(LookupError::MissingResults)
    }
}

/// Looks up which tracks and recordings a fingerprint belongs to.
pub trait FingerprintLookup: Send + Sync {
    fn lookup(&self, fingerprint: &AcousticFingerprint) -> Result<Vec<LookupResult>, LookupError>;
}

pub struct AcoustIdClient {
    client: Client,
    api_key: String,
    lookup_url: String,
    last_request: Mutex<Instant>,
}

impl AcoustIdClient {
    pub fn new(api_key: &str, user_agent: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            lookup_url: ACOUSTID_LOOKUP_URL.to_string(),
            last_request: Mutex::new(Instant::now() - RATE_LIMIT_INTERVAL),
        })
    }

    fn rate_limit(&self) {
        // A poisoned lock only means another lookup panicked mid-wait
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let elapsed = last.elapsed();
        if elapsed < RATE_LIMIT_INTERVAL {
            std::thread::sleep(RATE_LIMIT_INTERVAL - elapsed);
        }
        *last = Instant::now();
    }
}

impl FingerprintLookup for AcoustIdClient {
    fn lookup(&self, fingerprint: &AcousticFingerprint) -> Result<Vec<LookupResult>, LookupError> {
        self.rate_limit();
        let duration = (fingerprint.duration.round() as u64).to_string();
        // AcoustID answers errors with a 4xx and a JSON envelope, so the
        // status code is not checked here.
        let response: LookupResponse = self
            .client
            .post(&self.lookup_url)
            .form(&[
                ("client", self.api_key.as_str()),
                ("meta", "recordingids"),
                ("duration", duration.as_str()),
                ("fingerprint", fingerprint.fingerprint.as_str()),
            ])
            .send()?
            .json()?;
        debug!(
            "AcoustID lookup returned status {} with {} results",
            response.status,
            response.results.as_ref().map_or(0, Vec::len)
        );
        response.into_results()
    }
}

/// What a set of lookup results says about a beatmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The fingerprint is unknown.
    NoResults,
    /// A track matched but has no recordings attached.
    NoRecordings { track_id: String },
    SingleRecording { track_id: String, recording_gid: String },
    MultipleRecordings { track_id: String, count: usize },
}

/// Interprets lookup results. Only the first (best) result is considered.
pub fn interpret_results(results: &[LookupResult]) -> LookupOutcome {
    let Some(best) = results.first() else {
        return LookupOutcome::NoResults;
    };
    let track_id = best.id.clone();
    match best.recordings.as_slice() {
        [] => LookupOutcome::NoRecordings { track_id },
        [only] => LookupOutcome::SingleRecording {
            track_id,
            recording_gid: only.id.clone(),
        },
        many => LookupOutcome::MultipleRecordings {
            track_id,
            count: many.len(),
        },
    }
}
