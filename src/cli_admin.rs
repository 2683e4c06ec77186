use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beatmap_linker::config::{AppConfig, CliConfig, FileConfig};
use beatmap_linker::pipeline::{actions, importer, string_matcher};
use beatmap_linker::PipelineContext;

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Operator commands against the beatmap database. They run outside of the
/// periodic pipeline and take effect immediately.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding beatmaps.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[clap(long, env = "OSU_CLIENT_ID")]
    pub osu_client_id: Option<String>,

    #[clap(long, env = "OSU_CLIENT_SECRET")]
    pub osu_client_secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetches one beatmap by its site id, enqueues it and runs one string
    /// matching pass.
    Fetch {
        #[clap(long)]
        site: String,
        #[clap(long)]
        id: String,
    },

    /// Imports new beatmaps from a site, then runs one string matching pass.
    Import {
        #[clap(long)]
        site: String,
    },

    /// Drops all match evidence of a beatmap and queues it for
    /// fingerprinting again. Also retries beatmaps in ERROR.
    Reset { beatmap_id: i64 },

    /// Drops a wrong recording link from a beatmap.
    ClearMatch { beatmap_id: i64 },

    /// Re-resolves recording links after the recording tables were
    /// replaced, dropping the ones that no longer resolve.
    RepairLinks,

    /// Shows a single beatmap.
    Show { beatmap_id: i64 },

    /// Shows how many beatmaps are in each state.
    Status,
}

#[derive(Serialize)]
struct BeatmapSummary {
    id: i64,
    site: String,
    external_id: String,
    url: Option<String>,
    artist: String,
    title: String,
    state: String,
    recording: Option<String>,
    track_id: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_string_matching(ctx: &PipelineContext) -> Result<()> {
    let report = string_matcher::match_with_string(
        ctx.beatmaps.as_ref(),
        ctx.recordings.as_ref(),
        ctx.settings.string_match_batch_size,
    )?;
    print_json(&report)
}

fn execute(command: Command, ctx: &PipelineContext) -> Result<()> {
    match command {
        Command::Fetch { site, id } => {
            let adapter = ctx
                .sites
                .get(&site)
                .with_context(|| format!("Site '{}' is not configured", site))?;
            let outcome = importer::fetch_single(ctx.beatmaps.as_ref(), adapter.as_ref(), &id)?;
            match outcome {
                importer::FetchOutcome::Inserted(beatmap_id) => {
                    println!("Enqueued as beatmap {}", beatmap_id)
                }
                importer::FetchOutcome::AlreadyKnown(beatmap_id) => {
                    println!("Already known as beatmap {}", beatmap_id)
                }
            }
            run_string_matching(ctx)
        }
        Command::Import { site } => {
            let adapter = ctx
                .sites
                .get(&site)
                .with_context(|| format!("Site '{}' is not configured", site))?;
            let report = importer::import_new(
                ctx.beatmaps.as_ref(),
                adapter.as_ref(),
                ctx.settings.import_max_pages,
            )?;
            print_json(&report)?;
            run_string_matching(ctx)
        }
        Command::Reset { beatmap_id } => {
            print_json(&actions::reset_match(ctx.beatmaps.as_ref(), beatmap_id)?)
        }
        Command::ClearMatch { beatmap_id } => {
            print_json(&actions::clear_match(ctx.beatmaps.as_ref(), beatmap_id)?)
        }
        Command::RepairLinks => print_json(&actions::repair_links(ctx.beatmaps.as_ref())?),
        Command::Show { beatmap_id } => {
            let beatmap = ctx
                .beatmaps
                .get_beatmap(beatmap_id)?
                .with_context(|| format!("Beatmap {} not found", beatmap_id))?;
            let url = ctx
                .beatmaps
                .get_site(&beatmap.site_code)?
                .map(|site| site.public_url(&beatmap.external_id));
            print_json(&BeatmapSummary {
                id: beatmap.id,
                url,
                state: beatmap.state.kind().to_string(),
                recording: beatmap.state.recording().map(str::to_string),
                track_id: beatmap.state.track_id().map(str::to_string),
                site: beatmap.site_code,
                external_id: beatmap.external_id,
                artist: beatmap.artist,
                title: beatmap.title,
            })
        }
        Command::Status => {
            for (state, count) in ctx.beatmaps.count_by_state()? {
                println!("{:<32} {}", state.as_str(), count);
            }
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        osu_client_id: cli_args.osu_client_id.clone(),
        osu_client_secret: cli_args.osu_client_secret.clone(),
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    let ctx = PipelineContext::from_config(&config)?;

    execute(cli_args.command, &ctx)
}
