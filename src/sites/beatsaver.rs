//! Beat Saver (beatsaver.com) adapter.

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    check_status, http_client, package, parse_timestamp, ExtractedAudio, ListingPage,
    PackageError, RawTrack, SiteAdapter, SiteError,
};
use crate::beatmap_store::Beatmap;
use crate::recording_store::casefold;

const BEATSAVER_API_BASE: &str = "https://beatsaver.com/api";
const SITE: &str = "bs";

#[derive(Deserialize)]
struct LatestResponse {
    docs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct MapDetail {
    id: String,
    uploaded: Option<String>,
    metadata: MapMetadata,
    #[serde(default)]
    versions: Vec<MapVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapMetadata {
    song_name: String,
    #[serde(default)]
    song_sub_name: String,
    #[serde(default)]
    song_author_name: String,
    #[serde(default)]
    level_author_name: String,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct MapVersion {
    #[serde(rename = "downloadURL")]
    download_url: String,
}

pub struct BeatSaverAdapter {
    client: Client,
    api_base: String,
}

impl BeatSaverAdapter {
    pub fn new(user_agent: &str) -> Result<Self, SiteError> {
        Ok(Self {
            client: http_client(user_agent)?,
            api_base: BEATSAVER_API_BASE.to_string(),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SiteError> {
        let response = check_status(self.client.get(url).query(query).send()?)?;
        Ok(response.json()?)
    }

    fn fetch_detail(&self, external_id: &str) -> Result<serde_json::Value, SiteError> {
        self.get_json(&format!("{}/maps/id/{}", self.api_base, external_id), &[])
    }
}

fn malformed(reason: impl ToString) -> SiteError {
    SiteError::Malformed {
        site: SITE,
        reason: reason.to_string(),
    }
}

/// Maps often list the mapper as song author and move the real artist to the
/// sub name. Use the sub name in that case.
fn artist_of(metadata: &MapMetadata) -> String {
    if casefold(&metadata.song_author_name) == casefold(&metadata.level_author_name) {
        metadata.song_sub_name.clone()
    } else {
        metadata.song_author_name.clone()
    }
}

fn raw_track(doc: serde_json::Value) -> Result<RawTrack, SiteError> {
    let detail: MapDetail = serde_json::from_value(doc.clone()).map_err(malformed)?;
    Ok(RawTrack {
        external_id: detail.id,
        artist: artist_of(&detail.metadata),
        title: detail.metadata.song_name,
        choreographer: Some(detail.metadata.level_author_name).filter(|s| !s.is_empty()),
        published_at: parse_timestamp(detail.uploaded.as_deref()),
        duration: detail.metadata.duration,
        payload: doc,
    })
}

/// Download URL of the newest version, from the cached payload when it has one.
fn cached_download_url(payload: Option<&serde_json::Value>) -> Option<String> {
    let detail: MapDetail = serde_json::from_value(payload?.clone()).ok()?;
    detail.versions.into_iter().next().map(|v| v.download_url)
}

impl SiteAdapter for BeatSaverAdapter {
    fn code(&self) -> &'static str {
        SITE
    }

    fn list_new(&self, cursor: Option<&str>) -> Result<ListingPage, SiteError> {
        let mut query = vec![("automapper", "false")];
        if let Some(before) = cursor {
            query.push(("before", before));
        }
        let response: LatestResponse =
            self.get_json(&format!("{}/maps/latest", self.api_base), &query)?;

        let tracks = response
            .docs
            .into_iter()
            .map(raw_track)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = tracks
            .last()
            .and_then(|t| t.payload.get("uploaded"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        debug!("Beat Saver listed {} maps before {:?}", tracks.len(), cursor);
        Ok(ListingPage {
            tracks,
            next_cursor,
        })
    }

    fn fetch_by_id(&self, external_id: &str) -> Result<RawTrack, SiteError> {
        raw_track(self.fetch_detail(external_id)?)
    }

    fn download_package(&self, beatmap: &Beatmap) -> Result<Vec<u8>, SiteError> {
        let url = match cached_download_url(beatmap.raw_metadata.as_ref()) {
            Some(url) => url,
            None => {
                let detail = self.fetch_detail(&beatmap.external_id)?;
                cached_download_url(Some(&detail))
                    .ok_or_else(|| malformed(format!("map {} has no versions", beatmap.external_id)))?
            }
        };
        debug!("Downloading beatmap {} from {}", beatmap.id, url);
        let response = check_status(self.client.get(&url).send()?)?;
        Ok(response.bytes()?.to_vec())
    }

    fn extract_audio(&self, package: &[u8]) -> Result<ExtractedAudio, PackageError> {
        package::extract_beatsaber_audio(package)
    }
}
