//! Bounded worker pool for series resolution.
//!
//! One job per episode. A semaphore caps the number of jobs holding network
//! calls at once; results come back in input order regardless of completion
//! order, and [`SeriesReport`] re-sorts them by ordinal.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::CatalogSink;
use crate::context::ResolverContext;
use crate::episode::{ContentType, EpisodeDescriptor, EpisodeEnumerator, SeriesListing};
use crate::error::{ResolveError, Result};
use crate::fallback::{
    AttemptOutcome, EpisodeManifest, FallbackOrchestrator, ResolutionFailure, StrategyAttempt,
    StrategyKind,
};

/// Result of one episode job.
pub type JobOutcome = std::result::Result<EpisodeManifest, ResolutionFailure>;

/// Which entries of a listing to resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpisodeFilter {
    #[default]
    All,
    EpisodesOnly,
    PreviewsOnly,
}

impl EpisodeFilter {
    /// Same selection as [`SeriesListing::episodes_only`] and
    /// [`SeriesListing::previews_only`].
    pub fn admits(self, descriptor: &EpisodeDescriptor) -> bool {
        match self {
            Self::All => true,
            Self::EpisodesOnly => descriptor.content_type == ContentType::Episode,
            Self::PreviewsOnly => descriptor.content_type.is_preview(),
        }
    }
}

/// Outcome of resolving a whole series.
#[derive(Debug)]
pub struct SeriesReport {
    pub listing: SeriesListing,
    /// Resolved entries; numbered episodes by ordinal, then the rest in listing order.
    pub manifests: Vec<EpisodeManifest>,
    pub failures: Vec<ResolutionFailure>,
}

impl SeriesReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves many episodes concurrently through a shared [`FallbackOrchestrator`].
#[derive(Clone)]
pub struct SeriesResolver {
    orchestrator: Arc<FallbackOrchestrator>,
}

impl SeriesResolver {
    pub fn new(ctx: ResolverContext) -> Self {
        Self::with_orchestrator(FallbackOrchestrator::new(ctx))
    }

    pub fn with_orchestrator(orchestrator: FallbackOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn context(&self) -> &ResolverContext {
        self.orchestrator.context()
    }

    /// Resolve every descriptor, at most `concurrency` at a time.
    ///
    /// Successful manifests are handed to `sink` as each job completes.
    /// The returned outcomes line up with `descriptors`.
    #[instrument(skip_all, fields(jobs = descriptors.len()))]
    pub async fn resolve_all(
        &self,
        descriptors: Vec<EpisodeDescriptor>,
        sink: Option<Arc<dyn CatalogSink>>,
        cancel: &CancellationToken,
    ) -> Vec<JobOutcome> {
        let config = self.context().config();
        let concurrency = config.effective_concurrency();
        let job_timeout = config.job_timeout();
        info!(concurrency, "Dispatching episode jobs");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut jobs = JoinSet::new();

        for (index, descriptor) in descriptors.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let sink = sink.clone();
            let token = cancel.child_token();

            jobs.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (index, Err(cancelled_before_start(descriptor)));
                };

                let deadline = Instant::now() + job_timeout;
                let outcome = orchestrator.resolve(descriptor, Some(deadline), &token).await;

                if let (Ok(manifest), Some(sink)) = (&outcome, &sink) {
                    if let Err(e) = sink.accept(manifest) {
                        warn!(url = %manifest.descriptor.source_url, error = %e, "Catalog sink rejected manifest");
                    }
                }
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<JobOutcome>> = descriptors.iter().map(|_| None).collect();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    debug!(index, ok = outcome.is_ok(), "Job finished");
                    outcomes[index] = Some(outcome);
                }
                Err(e) => warn!(error = %e, "Episode job aborted"),
            }
        }

        let outcomes: Vec<JobOutcome> = outcomes
            .into_iter()
            .zip(descriptors)
            .map(|(outcome, descriptor)| outcome.unwrap_or_else(|| Err(aborted(descriptor))))
            .collect();

        let resolved = outcomes.iter().filter(|o| o.is_ok()).count();
        info!(resolved, failed = outcomes.len() - resolved, "Episode jobs complete");
        outcomes
    }

    /// Enumerate `series_url` and resolve the entries admitted by `filter`.
    #[instrument(skip(self, sink, cancel))]
    pub async fn resolve_series(
        &self,
        series_url: &str,
        filter: EpisodeFilter,
        sink: Option<Arc<dyn CatalogSink>>,
        cancel: &CancellationToken,
    ) -> Result<SeriesReport> {
        let enumerator = EpisodeEnumerator::new(self.context().config().max_episodes);
        let listing = enumerator.list(self.context(), series_url, cancel).await?;

        let selected: Vec<EpisodeDescriptor> = listing
            .episodes
            .iter()
            .filter(|d| filter.admits(d))
            .cloned()
            .collect();

        let mut manifests = Vec::new();
        let mut failures = Vec::new();
        for outcome in self.resolve_all(selected, sink, cancel).await {
            match outcome {
                Ok(manifest) => manifests.push(manifest),
                Err(failure) => failures.push(failure),
            }
        }
        // Stable: unnumbered entries keep their listing order after the numbered ones.
        manifests.sort_by_key(|m| (m.descriptor.ordinal.is_none(), m.descriptor.ordinal));

        Ok(SeriesReport {
            listing,
            manifests,
            failures,
        })
    }
}

fn cancelled_before_start(descriptor: EpisodeDescriptor) -> ResolutionFailure {
    ResolutionFailure {
        descriptor,
        attempts: vec![StrategyAttempt {
            strategy: StrategyKind::DirectExtraction,
            outcome: AttemptOutcome::Failed {
                error: ResolveError::Cancelled,
            },
            elapsed_ms: 0,
        }],
        latency_ms: 0,
    }
}

fn aborted(descriptor: EpisodeDescriptor) -> ResolutionFailure {
    ResolutionFailure {
        descriptor,
        attempts: Vec::new(),
        latency_ms: 0,
    }
}
