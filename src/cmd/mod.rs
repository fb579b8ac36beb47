pub mod list;
pub mod output;
pub mod resolve;
pub mod series;
pub mod subtitles;

use anyhow::{Context, Result};

use iqresolve::episode::page_url;
use iqresolve::{EpisodeFilter, ResolverConfig};

/// URL from the command line, else the configured target.
pub fn target_url(arg: Option<&str>, config: &ResolverConfig) -> Result<String> {
    let raw = arg
        .or(config.target_url.as_deref())
        .context("No URL given and no target_url configured")?;
    Ok(page_url(raw)?.to_string())
}

pub fn episode_filter(episodes_only: bool, previews_only: bool) -> EpisodeFilter {
    match (episodes_only, previews_only) {
        (true, _) => EpisodeFilter::EpisodesOnly,
        (false, true) => EpisodeFilter::PreviewsOnly,
        (false, false) => EpisodeFilter::All,
    }
}
