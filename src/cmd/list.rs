use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use iqresolve::{EpisodeEnumerator, EpisodeFilter, ResolverConfig, ResolverContext};

use super::output::print_listing;
use super::target_url;
use crate::OutputFormat;

pub async fn cmd_list(
    config: ResolverConfig,
    url: Option<&str>,
    filter: EpisodeFilter,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = target_url(url, &config)?;
    let enumerator = EpisodeEnumerator::new(config.max_episodes);
    let ctx = ResolverContext::new(config).context("Failed to build resolver")?;

    let listing = enumerator
        .list(&ctx, &url, cancel)
        .await
        .with_context(|| format!("Failed to enumerate {url}"))?;

    let entries: Vec<_> = listing.episodes.iter().filter(|d| filter.admits(d)).collect();
    print_listing(&listing, &entries, format)
}
