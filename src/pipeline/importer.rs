//! Pulling new beatmaps from the sites into the INITIAL queue.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::beatmap_store::BeatmapStore;
use crate::sites::SiteAdapter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub site: String,
    pub pages: usize,
    pub imported: usize,
    pub already_known: usize,
}

/// Walks a site's listing from the newest beatmap backwards, inserting what
/// is new. Stops after the first page containing an already-known beatmap,
/// or after `max_pages` pages.
pub fn import_new(
    store: &dyn BeatmapStore,
    adapter: &dyn SiteAdapter,
    max_pages: usize,
) -> Result<ImportReport> {
    let mut report = ImportReport {
        site: adapter.code().to_string(),
        ..Default::default()
    };
    let mut cursor: Option<String> = None;

    while report.pages < max_pages {
        let page = adapter
            .list_new(cursor.as_deref())
            .with_context(|| format!("Failed to list new beatmaps on {}", adapter.code()))?;
        report.pages += 1;
        if page.tracks.is_empty() {
            break;
        }

        let mut reached_known = false;
        for track in page.tracks {
            let external_id = track.external_id.clone();
            match store.insert_beatmap(&track.into_new_beatmap(adapter.code()))? {
                Some(id) => {
                    debug!("Imported {} beatmap {} as {}", adapter.code(), external_id, id);
                    report.imported += 1;
                }
                None => {
                    reached_known = true;
                    report.already_known += 1;
                }
            }
        }
        if reached_known {
            break;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    info!(
        "Imported {} new beatmaps from {} ({} pages)",
        report.imported, report.site, report.pages
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Inserted(i64),
    AlreadyKnown(i64),
}

impl FetchOutcome {
    pub fn beatmap_id(&self) -> i64 {
        match self {
            FetchOutcome::Inserted(id) | FetchOutcome::AlreadyKnown(id) => *id,
        }
    }
}

/// Fetches one beatmap by its site id and enqueues it at INITIAL, outside of
/// the periodic import.
pub fn fetch_single(
    store: &dyn BeatmapStore,
    adapter: &dyn SiteAdapter,
    external_id: &str,
) -> Result<FetchOutcome> {
    if let Some(existing) = store.find_beatmap(adapter.code(), external_id)? {
        info!(
            "{} beatmap {} is already known as {} ({})",
            adapter.code(),
            external_id,
            existing.id,
            existing.state.kind()
        );
        return Ok(FetchOutcome::AlreadyKnown(existing.id));
    }

    let track = adapter
        .fetch_by_id(external_id)
        .with_context(|| format!("Failed to fetch {} beatmap {}", adapter.code(), external_id))?;
    let new_beatmap = track.into_new_beatmap(adapter.code());
    match store.insert_beatmap(&new_beatmap)? {
        Some(id) => {
            info!("Fetched {} beatmap {} as {}", adapter.code(), external_id, id);
            Ok(FetchOutcome::Inserted(id))
        }
        // The site may answer with a canonical id differing from the one asked for
        None => {
            let existing = store
                .find_beatmap(adapter.code(), &new_beatmap.external_id)?
                .with_context(|| {
                    format!(
                        "{} beatmap {} was neither inserted nor found",
                        adapter.code(),
                        new_beatmap.external_id
                    )
                })?;
            Ok(FetchOutcome::AlreadyKnown(existing.id))
        }
    }
}
