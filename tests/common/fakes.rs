//! In-process stand-ins for the remote services.

use anyhow::Result;
use beatmap_linker::beatmap_store::{
    AcousticFingerprint, Beatmap, BeatmapSite, BeatmapStore, LinkRepairReport, NewBeatmap,
    StateKind, Transition,
};
use beatmap_linker::fingerprint::{
    FingerprintEngine, FingerprintError, FingerprintLookup, LookupError, LookupRecording,
    LookupResult,
};
use beatmap_linker::sites::{
    package, ExtractedAudio, ListingPage, PackageError, RawTrack, SiteAdapter, SiteError,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

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

/// A Beat Saber style archive whose song file holds `song`.
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

/// A site serving fixed listing pages, newest first. The cursor is the
/// index of the page to serve.
pub struct FakeSite {
    code: &'static str,
    pages: Vec<Vec<RawTrack>>,
    packages: HashMap<String, Vec<u8>>,
    downloadable: bool,
    downloads: AtomicUsize,
}

impl FakeSite {
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            pages: Vec::new(),
            packages: HashMap::new(),
            downloadable: true,
            downloads: AtomicUsize::new(0),
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

    pub fn without_downloads(mut self) -> Self {
        self.downloadable = false;
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl SiteAdapter for FakeSite {
    fn code(&self) -> &'static str {
        self.code
    }

    fn list_new(&self, cursor: Option<&str>) -> Result<ListingPage, SiteError> {
        let index: usize = cursor.map_or(0, |c| c.parse().unwrap());
        Ok(ListingPage {
            tracks: self.pages.get(index).cloned().unwrap_or_default(),
            next_cursor: (index + 1 < self.pages.len()).then(|| (index + 1).to_string()),
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
        self.downloads.fetch_add(1, Ordering::SeqCst);
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
    answers: HashMap<String, Vec<LookupResult>>,
    calls: AtomicUsize,
}

impl TableLookup {
    pub fn answer(mut self, fingerprint: &str, results: Vec<LookupResult>) -> Self {
        self.answers.insert(fingerprint.to_string(), results);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FingerprintLookup for TableLookup {
    fn lookup(&self, fingerprint: &AcousticFingerprint) -> Result<Vec<LookupResult>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
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

/// Counts the writes going through to the wrapped store.
pub struct CountingStore {
    inner: Arc<dyn BeatmapStore>,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn BeatmapStore>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BeatmapStore for CountingStore {
    fn list_sites(&self) -> Result<Vec<BeatmapSite>> {
        self.inner.list_sites()
    }

    fn get_site(&self, code: &str) -> Result<Option<BeatmapSite>> {
        self.inner.get_site(code)
    }

    fn insert_beatmap(&self, beatmap: &NewBeatmap) -> Result<Option<i64>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_beatmap(beatmap)
    }

    fn get_beatmap(&self, id: i64) -> Result<Option<Beatmap>> {
        self.inner.get_beatmap(id)
    }

    fn find_beatmap(&self, site_code: &str, external_id: &str) -> Result<Option<Beatmap>> {
        self.inner.find_beatmap(site_code, external_id)
    }

    fn oldest_in_state(
        &self,
        state: StateKind,
        site_codes: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Beatmap>> {
        self.inner.oldest_in_state(state, site_codes, limit)
    }

    fn count_in_state(&self, state: StateKind, site_codes: Option<&[String]>) -> Result<usize> {
        self.inner.count_in_state(state, site_codes)
    }

    fn count_by_state(&self) -> Result<Vec<(StateKind, usize)>> {
        self.inner.count_by_state()
    }

    fn apply_transitions(&self, transitions: &[Transition]) -> Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.apply_transitions(transitions)
    }

    fn repair_recording_links(&self) -> Result<LinkRepairReport> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.repair_recording_links()
    }
}
