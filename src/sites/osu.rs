//! osu! adapter (API v2, client-credentials grant).
//!
//! Beatmapset downloads need a user-authorised token, which a background
//! service does not have, so this site is imported and string-matched only.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{
    check_status, http_client, package, parse_timestamp, ExtractedAudio, ListingPage,
    PackageError, RawTrack, SiteAdapter, SiteError,
};
use crate::beatmap_store::Beatmap;

const OSU_BASE: &str = "https://osu.ppy.sh";
const SITE: &str = "osu";
// Refresh a bit before the server-side expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsuCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct SearchResponse {
    beatmapsets: Vec<serde_json::Value>,
    cursor_string: Option<String>,
}

#[derive(Deserialize)]
struct Beatmapset {
    id: u64,
    artist: String,
    artist_unicode: Option<String>,
    title: String,
    title_unicode: Option<String>,
    creator: Option<String>,
    submitted_date: Option<String>,
    #[serde(default)]
    beatmaps: Vec<Difficulty>,
}

#[derive(Deserialize)]
struct Difficulty {
    total_length: f64,
}

pub struct OsuAdapter {
    client: Client,
    credentials: OsuCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl OsuAdapter {
    pub fn new(user_agent: &str, credentials: OsuCredentials) -> Result<Self, SiteError> {
        Ok(Self {
            client: http_client(user_agent)?,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn access_token(&self) -> Result<String, SiteError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| SiteError::Auth(SITE, "token cache poisoned".to_string()))?;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/oauth/token", OSU_BASE))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", "public"),
            ])
            .send()?;
        if !response.status().is_success() {
            return Err(SiteError::Auth(
                SITE,
                format!("token endpoint returned {}", response.status()),
            ));
        }
        let token: TokenResponse = response.json()?;
        info!("Obtained osu! API token valid for {}s", token.expires_in);

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SiteError> {
        let token = self.access_token()?;
        let response = self
            .client
            .get(format!("{}/api/v2{}", OSU_BASE, path))
            .query(query)
            .bearer_auth(token)
            .send()?;
        Ok(check_status(response)?.json()?)
    }
}

fn raw_track(doc: serde_json::Value) -> Result<RawTrack, SiteError> {
    let set: Beatmapset = serde_json::from_value(doc.clone()).map_err(|e| SiteError::Malformed {
        site: SITE,
        reason: e.to_string(),
    })?;
    let duration = set
        .beatmaps
        .iter()
        .map(|d| d.total_length)
        .fold(None, |longest: Option<f64>, length| {
            Some(longest.map_or(length, |l| l.max(length)))
        });
    Ok(RawTrack {
        external_id: set.id.to_string(),
        artist: set.artist_unicode.filter(|s| !s.is_empty()).unwrap_or(set.artist),
        title: set.title_unicode.filter(|s| !s.is_empty()).unwrap_or(set.title),
        choreographer: set.creator,
        published_at: parse_timestamp(set.submitted_date.as_deref()),
        duration,
        payload: doc,
    })
}

impl SiteAdapter for OsuAdapter {
    fn code(&self) -> &'static str {
        SITE
    }

    fn list_new(&self, cursor: Option<&str>) -> Result<ListingPage, SiteError> {
        let mut query = vec![("sort", "updated_desc"), ("s", "any")];
        if let Some(cursor) = cursor {
            query.push(("cursor_string", cursor));
        }
        let response: SearchResponse = self.get_json("/beatmapsets/search", &query)?;
        let tracks = response
            .beatmapsets
            .into_iter()
            .map(raw_track)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("osu! listed {} beatmapsets", tracks.len());
        Ok(ListingPage {
            tracks,
            next_cursor: response.cursor_string,
        })
    }

    fn fetch_by_id(&self, external_id: &str) -> Result<RawTrack, SiteError> {
        raw_track(self.get_json(&format!("/beatmapsets/{}", external_id), &[])?)
    }

    fn can_download_audio(&self) -> bool {
        false
    }

    fn download_package(&self, _beatmap: &Beatmap) -> Result<Vec<u8>, SiteError> {
        Err(SiteError::DownloadUnsupported(SITE))
    }

    fn extract_audio(&self, package: &[u8]) -> Result<ExtractedAudio, PackageError> {
        package::extract_osu_audio(package)
    }
}
