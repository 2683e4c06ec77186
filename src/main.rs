use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beatmap_linker::config::{AppConfig, CliConfig, FileConfig};
use beatmap_linker::{PipelineContext, PipelineService};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding beatmaps.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// User agent sent to every remote service.
    #[clap(long)]
    pub user_agent: Option<String>,

    /// AcoustID application key. Fingerprints are not looked up without it.
    #[clap(long, env = "ACOUSTID_API_KEY")]
    pub acoustid_api_key: Option<String>,

    #[clap(long, env = "OSU_CLIENT_ID")]
    pub osu_client_id: Option<String>,

    #[clap(long, env = "OSU_CLIENT_SECRET")]
    pub osu_client_secret: Option<String>,

    /// Path to the fpcalc binary.
    #[clap(long)]
    pub fpcalc_path: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            user_agent: self.user_agent.clone(),
            acoustid_api_key: self.acoustid_api_key.clone(),
            osu_client_id: self.osu_client_id.clone(),
            osu_client_secret: self.osu_client_secret.clone(),
            fpcalc_path: self.fpcalc_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    info!("Using database at {:?}", config.beatmaps_db_path());

    let ctx = PipelineContext::from_config(&config)?;
    let pipeline = PipelineService::start(ctx).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for running stages to finish");

    pipeline.stop().await
}
