use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::beatmap_store::{BeatmapStore, SqliteBeatmapStore};
use crate::config::{AppConfig, PipelineSettings};
use crate::fingerprint::{AcoustIdClient, FingerprintEngine, FingerprintLookup, FpcalcEngine};
use crate::recording_store::{RecordingStore, SqliteRecordingStore};
use crate::sites::{BeatSaverAdapter, OsuAdapter, SiteRegistry};

/// Everything the stages need, built once at startup and passed around.
#[derive(Clone)]
pub struct PipelineContext {
    pub beatmaps: Arc<dyn BeatmapStore>,
    pub recordings: Arc<dyn RecordingStore>,
    pub sites: SiteRegistry,
    pub engine: Arc<dyn FingerprintEngine>,
    /// `None` when no AcoustID key is configured.
    pub lookup: Option<Arc<dyn FingerprintLookup>>,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = SqliteBeatmapStore::open(config.beatmaps_db_path())?;
        let recordings = SqliteRecordingStore::new(store.shared_connection())?;

        let mut sites = SiteRegistry::new();
        sites.register(Arc::new(
            BeatSaverAdapter::new(&config.user_agent).context("Failed to build Beat Saver client")?,
        ));
        match &config.osu {
            Some(credentials) => sites.register(Arc::new(
                OsuAdapter::new(&config.user_agent, credentials.clone())
                    .context("Failed to build osu! client")?,
            )),
            None => info!("No osu! credentials configured, osu! beatmaps will not be imported"),
        }

        let engine = FpcalcEngine::new(&config.pipeline.fpcalc_path);
        if let Err(e) = engine.check_available() {
            warn!("Fingerprinting will fail until fpcalc is installed: {}", e);
        }

        let lookup: Option<Arc<dyn FingerprintLookup>> = match &config.acoustid_api_key {
            Some(key) => Some(Arc::new(
                AcoustIdClient::new(key, &config.user_agent, config.pipeline.lookup_timeout())
                    .context("Failed to build AcoustID client")?,
            )),
            None => {
                warn!("No AcoustID API key configured, fingerprints will not be looked up");
                None
            }
        };

        info!("Pipeline configured for sites: {:?}", sites.codes());
        Ok(Self {
            beatmaps: Arc::new(store),
            recordings: Arc::new(recordings),
            sites,
            engine: Arc::new(engine),
            lookup,
            settings: config.pipeline.clone(),
        })
    }
}
