//! `iqresolve` CLI - resolve episode pages into manifests and subtitle tracks

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use iqresolve::{ResolverConfig, SubtitleFormat};

#[derive(Parser)]
#[command(name = "iqresolve")]
#[command(about = "Resolve episode pages into playable manifests and per-episode subtitle tracks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/iqresolve/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Concurrent episode jobs
    #[arg(short = 'j', long, global = true)]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Retries for transient failures
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Maximum episode-list entries to process
    #[arg(long, global = true)]
    max_episodes: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one episode page to its manifest and subtitles
    Resolve {
        /// Episode page URL (default: target_url from config)
        url: Option<String>,
    },

    /// List subtitle tracks for one episode page
    Subtitles {
        /// Episode page URL (default: target_url from config)
        url: Option<String>,

        /// Subtitle formats (comma-separated: srt, webvtt, xml)
        #[arg(short, long, value_delimiter = ',')]
        format: Vec<SubtitleFormat>,
    },

    /// Enumerate the episode list of a series page
    List {
        /// Series page URL (default: target_url from config)
        url: Option<String>,

        /// Only numbered episodes
        #[arg(long, conflicts_with = "previews_only")]
        episodes_only: bool,

        /// Only previews and trailers
        #[arg(long)]
        previews_only: bool,
    },

    /// Resolve every entry of a series page
    Series {
        /// Series page URL (default: target_url from config)
        url: Option<String>,

        /// Skip previews and trailers
        #[arg(long)]
        episodes_only: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line
    Json,
    /// Human-readable summary
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&cli)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight jobs");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Resolve { url } => {
            cmd::resolve::cmd_resolve(config, url.as_deref(), cli.output, &cancel).await?;
        }
        Commands::Subtitles { url, format } => {
            cmd::subtitles::cmd_subtitles(config, url.as_deref(), &format, cli.output, &cancel).await?;
        }
        Commands::List {
            url,
            episodes_only,
            previews_only,
        } => {
            let filter = cmd::episode_filter(episodes_only, previews_only);
            cmd::list::cmd_list(config, url.as_deref(), filter, cli.output, &cancel).await?;
        }
        Commands::Series { url, episodes_only } => {
            let filter = cmd::episode_filter(episodes_only, false);
            cmd::series::cmd_series(config, url.as_deref(), filter, cli.output, &cancel).await?;
        }
    }

    Ok(())
}

/// File (explicit or default location) first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<ResolverConfig> {
    let mut config = match &cli.config {
        Some(path) => ResolverConfig::load_from(path)?,
        None => ResolverConfig::load_default().context("Failed to load default config")?,
    };

    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    if let Some(max) = cli.max_episodes {
        config.max_episodes = max;
    }

    config.validate()?;
    Ok(config)
}
