use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::models::{Beatmap, BeatmapSite, LinkRepairReport, NewBeatmap, Transition};
use super::schema::{BEATMAP_DB_VERSIONED_SCHEMAS, SEED_SITES};
use super::state::{BeatmapState, StateKind, StoredState};
use crate::sqlite_persistence::ensure_schema;

/// Redirect chains longer than this are treated as broken.
pub const MAX_REDIRECT_HOPS: usize = 5;

pub trait BeatmapStore: Send + Sync {
    fn list_sites(&self) -> Result<Vec<BeatmapSite>>;

    fn get_site(&self, code: &str) -> Result<Option<BeatmapSite>>;

    /// Inserts a beatmap in INITIAL. Returns `None` when `(site, external_id)`
    /// is already known, leaving the existing row untouched.
    fn insert_beatmap(&self, beatmap: &NewBeatmap) -> Result<Option<i64>>;

    fn get_beatmap(&self, id: i64) -> Result<Option<Beatmap>>;

    fn find_beatmap(&self, site_code: &str, external_id: &str) -> Result<Option<Beatmap>>;

    /// Up to `limit` beatmaps in `state`, least recently checked first.
    /// `site_codes` restricts the search to the given sites.
    fn oldest_in_state(
        &self,
        state: StateKind,
        site_codes: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Beatmap>>;

    fn count_in_state(&self, state: StateKind, site_codes: Option<&[String]>) -> Result<usize>;

    fn count_by_state(&self) -> Result<Vec<(StateKind, usize)>>;

    /// Commits all transitions atomically and refreshes their `last_checked`.
    ///
    /// A transition whose beatmap is no longer in `from` is skipped. Returns
    /// how many were applied.
    fn apply_transitions(&self, transitions: &[Transition]) -> Result<usize>;

    /// Re-points recording links after canonical recordings were merged and
    /// degrades beatmaps whose recording no longer exists.
    fn repair_recording_links(&self) -> Result<LinkRepairReport>;
}

const BEATMAP_COLUMNS: &str = "b.id, s.code, b.external_id, b.artist, b.title, b.choreographer, \
    b.release_date, b.duration, b.raw_metadata, b.state, b.fingerprint, b.fingerprint_duration, \
    b.track_id, b.recording_gid, b.error_message, b.last_checked, b.created_at";

const BEATMAP_FROM: &str = "FROM beatmaps b JOIN sites s ON s.id = b.site_id";

/// SQLite-backed beatmap store.
///
/// The canonical recording tables live in the same file, see
/// [`SqliteBeatmapStore::shared_connection`].
pub struct SqliteBeatmapStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBeatmapStore {
    /// Opens (or creates) the database at `db_path` and seeds the known sites.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open {:?}", db_path.as_ref()))?;
        let store = Self::from_connection(conn)?;
        info!("Opened beatmap database at {:?}", db_path.as_ref());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        ensure_schema(&conn, BEATMAP_DB_VERSIONED_SCHEMAS, "beatmap")?;
        for (code, name, url_base, url_suffix) in SEED_SITES {
            conn.execute(
                "INSERT OR IGNORE INTO sites (code, name, url_base, url_suffix) VALUES (?1, ?2, ?3, ?4)",
                params![code, name, url_base, url_suffix],
            )?;
        }
        Ok(SqliteBeatmapStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The underlying connection, shared with the recording store reading the
    /// canonical tables of the same file.
    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("beatmap database mutex poisoned"))
    }

    fn row_to_beatmap(row: &rusqlite::Row) -> rusqlite::Result<Beatmap> {
        let conversion_error = |index: usize, err: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err)
        };

        let raw_metadata = row
            .get::<_, Option<String>>(8)?
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| conversion_error(8, Box::new(e)))?;

        let state = BeatmapState::decode(StoredState {
            state: row.get(9)?,
            fingerprint: row.get(10)?,
            fingerprint_duration: row.get(11)?,
            track_id: row.get(12)?,
            recording_gid: row.get(13)?,
            error_message: row.get(14)?,
        })
        .map_err(|e| conversion_error(9, Box::new(e)))?;

        Ok(Beatmap {
            id: row.get(0)?,
            site_code: row.get(1)?,
            external_id: row.get(2)?,
            artist: row.get(3)?,
            title: row.get(4)?,
            choreographer: row.get(5)?,
            release_date: row
                .get::<_, Option<i64>>(6)?
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            duration: row.get(7)?,
            raw_metadata,
            state,
            last_checked: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn query_beatmaps(conn: &Connection, filter: &str, args: Vec<Value>) -> Result<Vec<Beatmap>> {
        let sql = format!("SELECT {} {} {}", BEATMAP_COLUMNS, BEATMAP_FROM, filter);
        let mut stmt = conn.prepare(&sql)?;
        let beatmaps = stmt
            .query_map(params_from_iter(args), Self::row_to_beatmap)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(beatmaps)
    }
}

/// Returns a timestamp strictly greater than every stored `last_checked`, so
/// rows touched later always sort after rows touched earlier.
fn next_tick(conn: &Connection) -> Result<i64> {
    let latest: i64 = conn.query_row(
        "SELECT COALESCE(MAX(last_checked), 0) FROM beatmaps",
        [],
        |row| row.get(0),
    )?;
    Ok(Utc::now().timestamp_millis().max(latest + 1))
}

/// Appends `AND s.code IN (...)` for a site restriction. Returns false when the
/// restriction is empty and nothing can match.
fn push_site_filter(sql: &mut String, args: &mut Vec<Value>, site_codes: Option<&[String]>) -> bool {
    let Some(codes) = site_codes else {
        return true;
    };
    if codes.is_empty() {
        return false;
    }
    let placeholders = vec!["?"; codes.len()].join(", ");
    sql.push_str(&format!(" AND s.code IN ({})", placeholders));
    args.extend(codes.iter().cloned().map(Value::Text));
    true
}

fn write_state(conn: &Connection, beatmap_id: i64, from: StateKind, to: &BeatmapState, tick: i64) -> Result<usize> {
    let stored = to.encode();
    let updated = conn.execute(
        "UPDATE beatmaps SET state = ?1, fingerprint = ?2, fingerprint_duration = ?3, \
         track_id = ?4, recording_gid = ?5, error_message = ?6, last_checked = ?7 \
         WHERE id = ?8 AND state = ?9",
        params![
            stored.state,
            stored.fingerprint,
            stored.fingerprint_duration,
            stored.track_id,
            stored.recording_gid,
            stored.error_message,
            tick,
            beatmap_id,
            from.as_str(),
        ],
    )?;
    Ok(updated)
}

impl BeatmapStore for SqliteBeatmapStore {
    fn list_sites(&self) -> Result<Vec<BeatmapSite>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, code, name, url_base, url_suffix FROM sites ORDER BY id")?;
        let sites = stmt
            .query_map([], |row| {
                Ok(BeatmapSite {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    url_base: row.get(3)?,
                    url_suffix: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sites)
    }

    fn get_site(&self, code: &str) -> Result<Option<BeatmapSite>> {
        Ok(self.list_sites()?.into_iter().find(|site| site.code == code))
    }

    fn insert_beatmap(&self, beatmap: &NewBeatmap) -> Result<Option<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let site_id: i64 = tx
            .query_row(
                "SELECT id FROM sites WHERE code = ?1",
                params![beatmap.site_code],
                |row| row.get(0),
            )
            .optional()?
            .with_context(|| format!("Unknown site '{}'", beatmap.site_code))?;

        let raw_metadata = beatmap
            .raw_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tick = next_tick(&tx)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO beatmaps (site_id, external_id, artist, title, choreographer, \
             release_date, duration, raw_metadata, state, last_checked, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                site_id,
                beatmap.external_id,
                beatmap.artist,
                beatmap.title,
                beatmap.choreographer,
                beatmap.release_date.map(|d| d.timestamp()),
                beatmap.duration,
                raw_metadata,
                StateKind::Initial.as_str(),
                tick,
                Utc::now().timestamp(),
            ],
        )?;
        let id = (inserted == 1).then(|| tx.last_insert_rowid());
        tx.commit()?;
        Ok(id)
    }

    fn get_beatmap(&self, id: i64) -> Result<Option<Beatmap>> {
        let conn = self.lock()?;
        Ok(Self::query_beatmaps(&conn, "WHERE b.id = ?", vec![Value::Integer(id)])?
            .into_iter()
            .next())
    }

    fn find_beatmap(&self, site_code: &str, external_id: &str) -> Result<Option<Beatmap>> {
        let conn = self.lock()?;
        Ok(Self::query_beatmaps(
            &conn,
            "WHERE s.code = ? AND b.external_id = ?",
            vec![
                Value::Text(site_code.to_string()),
                Value::Text(external_id.to_string()),
            ],
        )?
        .into_iter()
        .next())
    }

    fn oldest_in_state(
        &self,
        state: StateKind,
        site_codes: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Beatmap>> {
        let mut filter = "WHERE b.state = ?".to_string();
        let mut args = vec![Value::Text(state.as_str().to_string())];
        if limit == 0 || !push_site_filter(&mut filter, &mut args, site_codes) {
            return Ok(Vec::new());
        }
        filter.push_str(" ORDER BY b.last_checked ASC, b.id ASC LIMIT ?");
        args.push(Value::Integer(limit as i64));

        let conn = self.lock()?;
        Self::query_beatmaps(&conn, &filter, args)
    }

    fn count_in_state(&self, state: StateKind, site_codes: Option<&[String]>) -> Result<usize> {
        let mut sql = format!("SELECT COUNT(*) {} WHERE b.state = ?", BEATMAP_FROM);
        let mut args = vec![Value::Text(state.as_str().to_string())];
        if !push_site_filter(&mut sql, &mut args, site_codes) {
            return Ok(0);
        }
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn count_by_state(&self) -> Result<Vec<(StateKind, usize)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM beatmaps GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = Vec::with_capacity(rows.len());
        for (state, count) in rows {
            let kind = StateKind::from_str(&state)
                .with_context(|| format!("Unknown state '{}' in beatmaps table", state))?;
            counts.push((kind, count as usize));
        }
        counts.sort_by_key(|(kind, _)| StateKind::ALL.iter().position(|k| k == kind));
        Ok(counts)
    }

    fn apply_transitions(&self, transitions: &[Transition]) -> Result<usize> {
        if transitions.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let tick = next_tick(&tx)?;

        let mut applied = 0;
        for transition in transitions {
            let updated = write_state(&tx, transition.beatmap_id, transition.from, &transition.to, tick)?;
            if updated == 0 {
                debug!(
                    "Beatmap {} left {} before the transition to {} was committed, skipping",
                    transition.beatmap_id,
                    transition.from,
                    transition.to.kind()
                );
            }
            applied += updated;
        }
        tx.commit()?;
        Ok(applied)
    }

    fn repair_recording_links(&self) -> Result<LinkRepairReport> {
        let mut conn = self.lock()?;
        // Cannot be toggled inside a transaction
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = repair_links(&mut conn);
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let report = result?;

        let mut stmt = conn.prepare("PRAGMA foreign_key_check(beatmaps)")?;
        let violations = stmt.query_map([], |_| Ok(()))?.count();
        if violations > 0 {
            bail!(
                "{} beatmap rows still violate foreign keys after repairing links",
                violations
            );
        }
        Ok(report)
    }
}

fn repair_links(conn: &mut Connection) -> Result<LinkRepairReport> {
    let tx = conn.transaction()?;
    let tick = next_tick(&tx)?;
    let mut report = LinkRepairReport::default();

    for _ in 0..MAX_REDIRECT_HOPS {
        let moved = tx.execute(
            "UPDATE beatmaps SET last_checked = ?1, recording_gid = ( \
                 SELECT r.gid FROM recording_gid_redirect rd \
                 JOIN recording r ON r.id = rd.new_id \
                 WHERE rd.gid = beatmaps.recording_gid) \
             WHERE EXISTS ( \
                 SELECT 1 FROM recording_gid_redirect rd \
                 JOIN recording r ON r.id = rd.new_id \
                 WHERE rd.gid = beatmaps.recording_gid)",
            params![tick],
        )?;
        if moved == 0 {
            break;
        }
        report.redirected += moved;
    }

    let dangling = SqliteBeatmapStore::query_beatmaps(
        &tx,
        "WHERE b.recording_gid IS NOT NULL \
         AND b.recording_gid NOT IN (SELECT gid FROM recording)",
        Vec::new(),
    )?;
    for beatmap in dangling {
        let from = beatmap.state.kind();
        let to = beatmap.state.without_recording();
        warn!(
            "Beatmap {} points at a recording that no longer exists, moving {} -> {}",
            beatmap.id,
            from,
            to.kind()
        );
        report.detached += write_state(&tx, beatmap.id, from, &to, tick)?;
    }

    tx.commit()?;
    info!(
        "Repaired recording links: {} redirected, {} detached",
        report.redirected, report.detached
    );
    Ok(report)
}
