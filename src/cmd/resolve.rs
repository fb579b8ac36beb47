use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use iqresolve::{EpisodeDescriptor, FallbackOrchestrator, ResolverConfig, ResolverContext};

use super::output::{print_failure, print_manifest};
use super::target_url;
use crate::OutputFormat;

pub async fn cmd_resolve(
    config: ResolverConfig,
    url: Option<&str>,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = target_url(url, &config)?;
    let deadline = Instant::now() + config.job_timeout();
    let ctx = ResolverContext::new(config).context("Failed to build resolver")?;
    let orchestrator = FallbackOrchestrator::new(ctx);

    match orchestrator
        .resolve(EpisodeDescriptor::from_url(&url), Some(deadline), cancel)
        .await
    {
        Ok(manifest) => print_manifest(&manifest, format),
        Err(failure) => {
            print_failure(&failure, format)?;
            Err(failure.into())
        }
    }
}
