mod file_config;

pub use file_config::{FileConfig, PipelineConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::sites::OsuCredentials;

pub const DEFAULT_USER_AGENT: &str = concat!("beatmap-linker/", env!("CARGO_PKG_VERSION"));

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub acoustid_api_key: Option<String>,
    pub osu_client_id: Option<String>,
    pub osu_client_secret: Option<String>,
    pub fpcalc_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub user_agent: String,
    /// Fingerprint lookup is disabled without a key.
    pub acoustid_api_key: Option<String>,
    /// The osu! site is not imported without credentials.
    pub osu: Option<OsuCredentials>,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let user_agent = file
            .user_agent
            .or_else(|| cli.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        if user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }

        let acoustid_api_key = file
            .acoustid_api_key
            .or_else(|| cli.acoustid_api_key.clone())
            .filter(|key| !key.is_empty());

        let osu_client_id = file.osu_client_id.or_else(|| cli.osu_client_id.clone());
        let osu_client_secret = file
            .osu_client_secret
            .or_else(|| cli.osu_client_secret.clone());
        let osu = match (osu_client_id, osu_client_secret) {
            (Some(client_id), Some(client_secret)) => Some(OsuCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => bail!("Both osu_client_id and osu_client_secret must be provided together"),
        };

        let p = file.pipeline.unwrap_or_default();
        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            string_match_batch_size: p
                .string_match_batch_size
                .unwrap_or(defaults.string_match_batch_size),
            string_match_interval_secs: p
                .string_match_interval_secs
                .unwrap_or(defaults.string_match_interval_secs),
            fingerprint_interval_secs: p
                .fingerprint_interval_secs
                .unwrap_or(defaults.fingerprint_interval_secs),
            lookup_interval_secs: p
                .lookup_interval_secs
                .unwrap_or(defaults.lookup_interval_secs),
            import_interval_secs: p
                .import_interval_secs
                .unwrap_or(defaults.import_interval_secs),
            import_jitter_secs: p.import_jitter_secs.unwrap_or(defaults.import_jitter_secs),
            import_max_pages: p.import_max_pages.unwrap_or(defaults.import_max_pages),
            lookup_timeout_secs: p
                .lookup_timeout_secs
                .unwrap_or(defaults.lookup_timeout_secs),
            suspend_when_idle: p.suspend_when_idle.unwrap_or(defaults.suspend_when_idle),
            max_concurrent_jobs: p
                .max_concurrent_jobs
                .unwrap_or(defaults.max_concurrent_jobs),
            fpcalc_path: p
                .fpcalc_path
                .or_else(|| cli.fpcalc_path.clone())
                .unwrap_or(defaults.fpcalc_path),
        };
        pipeline.validate()?;

        Ok(Self {
            db_dir,
            user_agent,
            acoustid_api_key,
            osu,
            pipeline,
        })
    }

    pub fn beatmaps_db_path(&self) -> PathBuf {
        self.db_dir.join("beatmaps.db")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub string_match_batch_size: usize,
    pub string_match_interval_secs: u64,
    pub fingerprint_interval_secs: u64,
    pub lookup_interval_secs: u64,
    pub import_interval_secs: u64,
    pub import_jitter_secs: u64,
    pub import_max_pages: usize,
    pub lookup_timeout_secs: u64,
    /// Park a stage job after an idle run until an upstream hook fires.
    pub suspend_when_idle: bool,
    pub max_concurrent_jobs: usize,
    pub fpcalc_path: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            string_match_batch_size: 10,
            string_match_interval_secs: 10,
            fingerprint_interval_secs: 60,
            lookup_interval_secs: 60,
            import_interval_secs: 3600,
            import_jitter_secs: 60,
            import_max_pages: 10,
            lookup_timeout_secs: 30,
            suspend_when_idle: true,
            max_concurrent_jobs: 4,
            fpcalc_path: "fpcalc".to_string(),
        }
    }
}

impl PipelineSettings {
    fn validate(&self) -> Result<()> {
        if self.string_match_batch_size == 0 {
            bail!("pipeline.string_match_batch_size must be at least 1");
        }
        if self.max_concurrent_jobs == 0 {
            bail!("pipeline.max_concurrent_jobs must be at least 1");
        }
        if self.import_max_pages == 0 {
            bail!("pipeline.import_max_pages must be at least 1");
        }
        let intervals = [
            ("string_match_interval_secs", self.string_match_interval_secs),
            ("fingerprint_interval_secs", self.fingerprint_interval_secs),
            ("lookup_interval_secs", self.lookup_interval_secs),
            ("import_interval_secs", self.import_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                bail!("pipeline.{} must be at least 1", name);
            }
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}
