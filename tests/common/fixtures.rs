//! On-disk test databases.

use beatmap_linker::beatmap_store::{BeatmapState, BeatmapStore, SqliteBeatmapStore};
use beatmap_linker::config::PipelineSettings;
use beatmap_linker::fingerprint::FingerprintLookup;
use beatmap_linker::recording_store::SqliteRecordingStore;
use beatmap_linker::sites::{SiteAdapter, SiteRegistry};
use beatmap_linker::PipelineContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use super::fakes::EchoEngine;

/// A beatmaps.db in a temporary directory, removed on drop.
pub struct TestDb {
    _dir: TempDir,
    pub path: PathBuf,
    pub store: Arc<SqliteBeatmapStore>,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("beatmaps.db");
        let store = Arc::new(SqliteBeatmapStore::open(&path).unwrap());
        Self {
            _dir: dir,
            path,
            store,
        }
    }

    /// Opens the same file again, as a restarted process would.
    pub fn reopen(&mut self) {
        self.store = Arc::new(SqliteBeatmapStore::open(&self.path).unwrap());
    }

    pub fn sql(&self, sql: &str) {
        self.store
            .shared_connection()
            .lock()
            .unwrap()
            .execute_batch(sql)
            .unwrap();
    }

    /// Adds a canonical recording. `length_ms` of `None` leaves it unknown.
    pub fn add_recording(&self, id: i64, gid: &str, name: &str, artist: &str, length_ms: Option<i64>) {
        let length = length_ms.map_or("NULL".to_string(), |ms| ms.to_string());
        self.sql(&format!(
            "INSERT OR IGNORE INTO artist_credit (id, name) VALUES ({id}, '{artist}');
             INSERT INTO recording (id, gid, name, artist_credit, length) VALUES ({id}, '{gid}', '{name}', {id}, {length});"
        ));
    }

    /// Gives a recording `count` release tracks.
    pub fn add_tracks(&self, recording_id: i64, count: usize) {
        for _ in 0..count {
            self.sql(&format!(
                "INSERT INTO track (recording) VALUES ({recording_id});"
            ));
        }
    }

    pub fn add_redirect(&self, old_gid: &str, new_recording_id: i64) {
        self.sql(&format!(
            "INSERT INTO recording_gid_redirect (gid, new_id) VALUES ('{old_gid}', {new_recording_id});"
        ));
    }

    pub fn context(
        &self,
        sites: Vec<Arc<dyn SiteAdapter>>,
        lookup: Option<Arc<dyn FingerprintLookup>>,
    ) -> PipelineContext {
        let mut registry = SiteRegistry::new();
        for site in sites {
            registry.register(site);
        }
        PipelineContext {
            beatmaps: self.store.clone(),
            recordings: Arc::new(SqliteRecordingStore::new(self.store.shared_connection()).unwrap()),
            sites: registry,
            engine: Arc::new(EchoEngine),
            lookup,
            settings: PipelineSettings::default(),
        }
    }

    pub fn state_of(&self, site: &str, external_id: &str) -> BeatmapState {
        self.store
            .find_beatmap(site, external_id)
            .unwrap()
            .unwrap_or_else(|| panic!("no beatmap {}/{}", site, external_id))
            .state
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
