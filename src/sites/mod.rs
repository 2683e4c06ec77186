//! Adapters for the rhythm-game sites beatmaps are imported from.
//!
//! Each site is one [`SiteAdapter`]. Adapters use a blocking HTTP client and
//! are only ever called from blocking job threads.

mod beatsaver;
mod osu;
pub mod package;

pub use beatsaver::BeatSaverAdapter;
pub use osu::{OsuAdapter, OsuCredentials};
pub use package::{ExtractedAudio, PackageError};

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::beatmap_store::{Beatmap, NewBeatmap};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {site}: {reason}")]
    Malformed { site: &'static str, reason: String },

    #[error("{0} does not offer audio downloads")]
    DownloadUnsupported(&'static str),

    #[error("{0} authentication failed: {1}")]
    Auth(&'static str, String),
}

/// A beatmap as listed by a site, with the full payload it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrack {
    pub external_id: String,
    pub artist: String,
    pub title: String,
    pub choreographer: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Seconds.
    pub duration: Option<f64>,
    pub payload: serde_json::Value,
}

impl RawTrack {
    pub fn into_new_beatmap(self, site_code: &str) -> NewBeatmap {
        NewBeatmap {
            site_code: site_code.to_string(),
            external_id: self.external_id,
            artist: self.artist,
            title: self.title,
            choreographer: self.choreographer,
            release_date: self.published_at,
            duration: self.duration,
            raw_metadata: Some(self.payload),
        }
    }
}

/// One page of a site's listing, newest first.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub tracks: Vec<RawTrack>,
    /// Where the next (older) page starts, if there is one.
    pub next_cursor: Option<String>,
}

pub trait SiteAdapter: Send + Sync {
    /// Short code matching `sites.code`.
    fn code(&self) -> &'static str;

    /// Lists beatmaps newest first, starting after `cursor` when given.
    fn list_new(&self, cursor: Option<&str>) -> Result<ListingPage, SiteError>;

    fn fetch_by_id(&self, external_id: &str) -> Result<RawTrack, SiteError>;

    /// Whether [`SiteAdapter::download_package`] can work at all.
    fn can_download_audio(&self) -> bool {
        true
    }

    /// Downloads the packaged beatmap (a zip archive) into memory.
    fn download_package(&self, beatmap: &Beatmap) -> Result<Vec<u8>, SiteError>;

    /// Pulls the audio payload out of a package from `download_package`.
    fn extract_audio(&self, package: &[u8]) -> Result<ExtractedAudio, PackageError>;
}

/// The adapters configured for this run, keyed by site code.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    adapters: Vec<Arc<dyn SiteAdapter>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter, replacing any previous one with the same code.
    pub fn register(&mut self, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.retain(|a| a.code() != adapter.code());
        self.adapters.push(adapter);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.iter().find(|a| a.code() == code).cloned()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn SiteAdapter>> {
        self.adapters.iter()
    }

    pub fn codes(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.code().to_string()).collect()
    }

    /// Codes of the sites whose beatmaps can be fingerprinted.
    pub fn downloadable_codes(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| a.can_download_audio())
            .map(|a| a.code().to_string())
            .collect()
    }
}

/// Blocking client shared by the adapters. Every request carries `user_agent`.
pub fn http_client(user_agent: &str) -> Result<Client, SiteError> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

fn check_status(response: Response) -> Result<Response, SiteError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SiteError::Status {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}
