use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub user_agent: Option<String>,
    pub acoustid_api_key: Option<String>,
    pub osu_client_id: Option<String>,
    pub osu_client_secret: Option<String>,

    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub string_match_batch_size: Option<usize>,
    pub string_match_interval_secs: Option<u64>,
    pub fingerprint_interval_secs: Option<u64>,
    pub lookup_interval_secs: Option<u64>,
    pub import_interval_secs: Option<u64>,
    pub import_jitter_secs: Option<u64>,
    pub import_max_pages: Option<usize>,
    pub lookup_timeout_secs: Option<u64>,
    pub suspend_when_idle: Option<bool>,
    pub max_concurrent_jobs: Option<usize>,
    pub fpcalc_path: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
