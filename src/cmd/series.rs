use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use iqresolve::{CatalogSink, EpisodeFilter, JsonLinesSink, ResolverConfig, ResolverContext, SeriesResolver};

use super::output::{print_failure, print_manifest};
use super::target_url;
use crate::OutputFormat;

pub async fn cmd_series(
    config: ResolverConfig,
    url: Option<&str>,
    filter: EpisodeFilter,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = target_url(url, &config)?;
    let ctx = ResolverContext::new(config).context("Failed to build resolver")?;
    let resolver = SeriesResolver::new(ctx);

    // JSON records stream out as each job completes; text waits for the sorted report.
    let sink: Option<Arc<dyn CatalogSink>> = match format {
        OutputFormat::Json => Some(Arc::new(JsonLinesSink::new(std::io::stdout()))),
        OutputFormat::Text => None,
    };

    let report = resolver
        .resolve_series(&url, filter, sink, cancel)
        .await
        .with_context(|| format!("Failed to enumerate {url}"))?;

    if format == OutputFormat::Text {
        for manifest in &report.manifests {
            print_manifest(manifest, format)?;
            println!();
        }
    }
    for failure in &report.failures {
        // Failures never reach the catalog stream.
        print_failure(failure, OutputFormat::Text)?;
    }

    let total = report.manifests.len() + report.failures.len();
    if !report.is_complete() {
        anyhow::bail!("{} of {total} entries unresolved", report.failures.len());
    }
    eprintln!("✅ {total} entries resolved");
    Ok(())
}
