use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use iqresolve::{ResolverConfig, ResolverContext, SubtitleFormat, SubtitleResolver};

use super::output::print_tracks;
use super::target_url;
use crate::OutputFormat;

pub async fn cmd_subtitles(
    config: ResolverConfig,
    url: Option<&str>,
    formats: &[SubtitleFormat],
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = target_url(url, &config)?;
    let formats = if formats.is_empty() {
        config.subtitle_formats.clone()
    } else {
        formats.to_vec()
    };
    let ctx = ResolverContext::new(config).context("Failed to build resolver")?;

    let tracks = SubtitleResolver::new(&ctx)
        .resolve(&url, &formats, cancel)
        .await
        .with_context(|| format!("Failed to resolve subtitles for {url}"))?;

    if tracks.is_empty() && format == OutputFormat::Text {
        println!("No subtitle tracks for {url}");
        return Ok(());
    }
    print_tracks(&tracks, format)
}
