//! Fakes shared by the stage tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

use super::PipelineContext;
use crate::beatmap_store::{
    AcousticFingerprint, Beatmap, BeatmapState, BeatmapStore, NewBeatmap, SqliteBeatmapStore,
    Transition,
};
use crate::config::PipelineSettings;
use crate::fingerprint::{
    FingerprintEngine, FingerprintError, FingerprintLookup, LookupError, LookupRecording,
    LookupResult,
};
use crate::recording_store::SqliteRecordingStore;
use crate::sites::{
    package, ExtractedAudio, ListingPage, PackageError, RawTrack, SiteAdapter, SiteError,
    SiteRegistry,
};

pub fn raw_track(external_id: &str, artist: &str, title: &str) -> RawTrack {
    RawTrack {
        external_id: external_id.to_string(),
        artist: artist.to_string(),
        title: title.to_string(),
        choreographer: Some("mapper".to_string()),
        published_at: None,
        duration: Some(200.0),
        payload: serde_json::json!({ "id": external_id }),
    }
}

pub fn beatsaber_package(song: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("Info.dat", options).unwrap();
    writer
        .write_all(br#"{"_songName": "x", "_songFilename": "song.egg"}"#)
        .unwrap();
    writer.start_file("song.egg", options).unwrap();
    writer.write_all(song).unwrap();
    writer.finish().unwrap().into_inner()
}

/// A site serving fixed listing pages and packages. The cursor is the index
/// of the page to serve.
pub struct FakeSite {
    pub code: &'static str,
    pub pages: Vec<Vec<RawTrack>>,
    pub packages: HashMap<String, Vec<u8>>,
    pub downloadable: bool,
    pub listed_pages: Mutex<usize>,
}

impl FakeSite {
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            pages: Vec::new(),
            packages: HashMap::new(),
            downloadable: true,
            listed_pages: Mutex::new(0),
        }
    }

    pub fn with_pages(mut self, pages: Vec<Vec<RawTrack>>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_package(mut self, external_id: &str, package: Vec<u8>) -> Self {
        self.packages.insert(external_id.to_string(), package);
        self
    }

    pub fn listed_pages(&self) -> usize {
        *self.listed_pages.lock().unwrap()
    }
}

impl SiteAdapter for FakeSite {
    fn code(&self) -> &'static str {
        self.code
    }

    fn list_new(&self, cursor: Option<&str>) -> Result<ListingPage, SiteError> {
        *self.listed_pages.lock().unwrap() += 1;
        let index: usize = cursor.map_or(0, |c| c.parse().unwrap());
        let tracks = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(ListingPage {
            tracks,
            next_cursor,
        })
    }

    fn fetch_by_id(&self, external_id: &str) -> Result<RawTrack, SiteError> {
        self.pages
            .iter()
            .flatten()
            .find(|t| t.external_id == external_id)
            .cloned()
            .ok_or_else(|| SiteError::Status {
                url: format!("fake://{}", external_id),
                status: 404,
            })
    }

    fn can_download_audio(&self) -> bool {
        self.downloadable
    }

    fn download_package(&self, beatmap: &Beatmap) -> Result<Vec<u8>, SiteError> {
        self.packages
            .get(&beatmap.external_id)
            .cloned()
            .ok_or_else(|| SiteError::Status {
                url: format!("fake://{}/download", beatmap.external_id),
                status: 404,
            })
    }

    fn extract_audio(&self, package: &[u8]) -> Result<ExtractedAudio, PackageError> {
        package::extract_beatsaber_audio(package)
    }
}

/// Fingerprints a file as its own content.
pub struct EchoEngine;

impl FingerprintEngine for EchoEngine {
    fn fingerprint(&self, audio_path: &Path) -> Result<AcousticFingerprint, FingerprintError> {
        let bytes = std::fs::read(audio_path)
            .map_err(|e| FingerprintError::Spawn("echo".to_string(), e))?;
        if bytes.is_empty() {
            return Err(FingerprintError::Decode("empty audio".to_string()));
        }
        Ok(AcousticFingerprint {
            duration: bytes.len() as f64,
            fingerprint: String::from_utf8_lossy(&bytes).to_string(),
        })
    }
}

/// Answers lookups from a table keyed by fingerprint. Unknown fingerprints
/// get a service error.
#[derive(Default)]
pub struct TableLookup {
    pub answers: HashMap<String, Vec<LookupResult>>,
}

impl TableLookup {
    pub fn answer(mut self, fingerprint: &str, results: Vec<LookupResult>) -> Self {
        self.answers.insert(fingerprint.to_string(), results);
        self
    }
}

impl FingerprintLookup for TableLookup {
    fn lookup(&self, fingerprint: &AcousticFingerprint) -> Result<Vec<LookupResult>, LookupError> {
        self.answers
            .get(&fingerprint.fingerprint)
            .cloned()
            .ok_or_else(|| LookupError::Service {
                status: "error".to_string(),
                message: "rate limit exceeded".to_string(),
            })
    }
}

pub fn lookup_result(track_id: &str, recordings: &[&str]) -> LookupResult {
    LookupResult {
        id: track_id.to_string(),
        score: 1.0,
        recordings: recordings
            .iter()
            .map(|id| LookupRecording { id: id.to_string() })
            .collect(),
    }
}

pub struct Fixture {
    pub store: Arc<SqliteBeatmapStore>,
    pub ctx: PipelineContext,
}

impl Fixture {
    pub fn new(sites: Vec<Arc<dyn SiteAdapter>>, lookup: Option<TableLookup>) -> Self {
        let store = Arc::new(SqliteBeatmapStore::in_memory().unwrap());
        let recordings = SqliteRecordingStore::new(store.shared_connection()).unwrap();
        let mut registry = SiteRegistry::new();
        for site in sites {
            registry.register(site);
        }
        let ctx = PipelineContext {
            beatmaps: store.clone(),
            recordings: Arc::new(recordings),
            sites: registry,
            engine: Arc::new(EchoEngine),
            lookup: lookup.map(|l| Arc::new(l) as Arc<dyn FingerprintLookup>),
            settings: PipelineSettings::default(),
        };
        Self { store, ctx }
    }

    pub fn sql(&self, sql: &str) {
        self.store
            .shared_connection()
            .lock()
            .unwrap()
            .execute_batch(sql)
            .unwrap();
    }

    pub fn add_recording(&self, id: i64, gid: &str, name: &str, artist: &str) {
        self.sql(&format!(
            "INSERT OR IGNORE INTO artist_credit (id, name) VALUES ({id}, '{artist}');
             INSERT INTO recording (id, gid, name, artist_credit, length) VALUES ({id}, '{gid}', '{name}', {id}, 200000);"
        ));
    }

    /// Inserts a beatmap and moves it straight to `state`.
    pub fn beatmap_in(&self, site: &str, external_id: &str, state: BeatmapState) -> i64 {
        let id = self
            .store
            .insert_beatmap(&NewBeatmap {
                site_code: site.to_string(),
                external_id: external_id.to_string(),
                artist: "Artist".to_string(),
                title: format!("Title {}", external_id),
                choreographer: None,
                release_date: None,
                duration: Some(200.0),
                raw_metadata: None,
            })
            .unwrap()
            .unwrap();
        if state != BeatmapState::Initial {
            let beatmap = self.store.get_beatmap(id).unwrap().unwrap();
            self.store
                .apply_transitions(&[Transition::of(&beatmap, state)])
                .unwrap();
        }
        id
    }

    pub fn state_of(&self, id: i64) -> BeatmapState {
        self.store.get_beatmap(id).unwrap().unwrap().state
    }

    pub fn last_checked(&self, id: i64) -> i64 {
        self.store.get_beatmap(id).unwrap().unwrap().last_checked
    }
}

pub fn fingerprint(value: &str) -> AcousticFingerprint {
    AcousticFingerprint {
        duration: value.len() as f64,
        fingerprint: value.to_string(),
    }
}
