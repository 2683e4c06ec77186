use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::normalize::{casefold, register_casefold};

/// A canonical recording matched by title and artist credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingCandidate {
    pub gid: String,
    pub name: String,
    pub artist_credit: String,
    /// Milliseconds.
    pub length: Option<i64>,
    /// How many tracks (release appearances) use this recording.
    pub track_count: i64,
}

/// Where following the redirect chain of a recording gid ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectResolution {
    /// The gid, or the end of its redirect chain, is a live recording.
    Resolved(String),
    /// The chain ends at a gid with no recording.
    NotFound,
    /// The chain loops or is longer than allowed.
    Broken,
}

/// Read-only view over the replicated canonical recording tables.
pub trait RecordingStore: Send + Sync {
    /// Recordings whose title and artist credit equal the given strings after
    /// case folding, best candidates first.
    ///
    /// With a duration (seconds) candidates are ordered by how close their
    /// length is to it, then by track count. Without one, by track count only.
    fn find_by_title_and_artist(
        &self,
        title: &str,
        artist: &str,
        duration: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RecordingCandidate>>;

    fn recording_exists(&self, gid: &str) -> Result<bool>;

    /// One hop of the merge redirect table: the gid of the recording `gid`
    /// was merged into, if any.
    fn redirect_target(&self, gid: &str) -> Result<Option<String>>;

    /// Follows redirects from `gid` to a live recording, giving up after
    /// `max_hops` redirects or on a cycle.
    fn resolve_gid(&self, gid: &str, max_hops: usize) -> Result<RedirectResolution> {
        let mut current = gid.to_string();
        let mut seen = HashSet::new();
        for _ in 0..=max_hops {
            if !seen.insert(current.clone()) {
                return Ok(RedirectResolution::Broken);
            }
            match self.redirect_target(&current)? {
                Some(next) => current = next,
                None if self.recording_exists(&current)? => {
                    return Ok(RedirectResolution::Resolved(current))
                }
                None => return Ok(RedirectResolution::NotFound),
            }
        }
        Ok(RedirectResolution::Broken)
    }
}

pub struct SqliteRecordingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordingStore {
    /// Wraps a connection to a database holding the canonical tables,
    /// typically [`crate::beatmap_store::SqliteBeatmapStore::shared_connection`].
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("recording database mutex poisoned"))?;
            register_casefold(&guard)?;
        }
        Ok(SqliteRecordingStore { conn })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("recording database mutex poisoned"))
    }
}

const CANDIDATE_SELECT: &str = "SELECT r.gid, r.name, ac.name, r.length, \
    (SELECT COUNT(*) FROM track t WHERE t.recording = r.id) AS track_count \
    FROM recording r JOIN artist_credit ac ON ac.id = r.artist_credit \
    WHERE casefold(r.name) = ?1 AND casefold(ac.name) = ?2";

impl RecordingStore for SqliteRecordingStore {
    fn find_by_title_and_artist(
        &self,
        title: &str,
        artist: &str,
        duration: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RecordingCandidate>> {
        let order = match duration {
            Some(_) => "ORDER BY ABS(COALESCE(r.length, 0) - ?3) ASC, track_count DESC, r.id ASC LIMIT ?4",
            None => "ORDER BY track_count DESC, r.id ASC LIMIT ?4",
        };
        let sql = format!("{} {}", CANDIDATE_SELECT, order);
        let duration_ms = duration.map(|secs| (secs * 1000.0).round() as i64);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row| {
            Ok(RecordingCandidate {
                gid: row.get(0)?,
                name: row.get(1)?,
                artist_credit: row.get(2)?,
                length: row.get(3)?,
                track_count: row.get(4)?,
            })
        };
        let title = casefold(title);
        let artist = casefold(artist);
        let candidates = match duration_ms {
            Some(ms) => stmt
                .query_map(params![title, artist, ms, limit as i64], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => {
                // ?3 is unused by this ordering but still bound
                stmt.query_map(
                    params![title, artist, Option::<i64>::None, limit as i64],
                    map_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(candidates)
    }

    fn recording_exists(&self, gid: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM recording WHERE gid = ?1)",
            params![gid],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn redirect_target(&self, gid: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                "SELECT r.gid FROM recording_gid_redirect rd \
                 JOIN recording r ON r.id = rd.new_id WHERE rd.gid = ?1",
                params![gid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }
}
