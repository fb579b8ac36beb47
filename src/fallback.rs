//! Ordered resolution strategies for one episode.
//!
//! # Architecture
//!
//! - [`ResolutionStrategy`]: async trait implemented by each strategy
//! - [`FallbackOrchestrator`]: runs the chain in registration order, first success wins
//! - [`EpisodeManifest`]: the record handed to the catalog, with provenance
//!
//! The default chain is direct extraction, deep state search, URL-pattern
//! generation, then an HTML anchor scan. Every attempt is recorded with its
//! outcome whether the job succeeds or not.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::context::ResolverContext;
use crate::episode::{absolute_url, EpisodeDescriptor, EpisodeEnumerator, ENTRY_URL_FIELD};
use crate::error::ResolveError;
use crate::extract::{fetch_html, resolve_page, FetchedPage, PageResolution};
use crate::manifest::StreamManifest;
use crate::subtitle::SubtitleTrack;

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("anchor selector should parse"));

static PLAY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/play/(?P<slug>.+?)-episode-(?P<n>\d{1,4})-(?P<id>[A-Za-z0-9]+)/?$")
        .expect("play path pattern should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectExtraction,
    DeepSearch,
    UrlPattern,
    HtmlScan,
}

impl StrategyKind {
    /// 1-based position in the default chain.
    pub fn number(self) -> u8 {
        match self {
            Self::DirectExtraction => 1,
            Self::DeepSearch => 2,
            Self::UrlPattern => 3,
            Self::HtmlScan => 4,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectExtraction => "direct_extraction",
            Self::DeepSearch => "deep_search",
            Self::UrlPattern => "url_pattern",
            Self::HtmlScan => "html_scan",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded {
        url: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        #[serde(serialize_with = "error_fields")]
        error: ResolveError,
    },
}

fn error_fields<S: Serializer>(error: &ResolveError, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut state = serializer.serialize_struct("Error", 2)?;
    state.serialize_field("kind", error.kind())?;
    state.serialize_field("message", &error.to_string())?;
    state.end()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

impl StrategyAttempt {
    pub fn error(&self) -> Option<&ResolveError> {
        match &self.outcome {
            AttemptOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Resolved episode, owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeManifest {
    #[serde(flatten)]
    pub descriptor: EpisodeDescriptor,
    pub manifest: StreamManifest,
    pub subtitles: Vec<SubtitleTrack>,
    pub strategy_used: StrategyKind,
    pub attempted_strategies: Vec<StrategyAttempt>,
    /// Page the manifest was actually resolved from.
    pub resolved_url: String,
    pub latency_ms: u64,
}

impl EpisodeManifest {
    /// Every subtitle URL carries the manifest's own `tvid`.
    pub fn subtitles_bound(&self) -> bool {
        self.subtitles
            .iter()
            .all(|t| t.bound_tvid().as_deref() == Some(self.manifest.tvid.as_str()))
    }
}

/// Every strategy failed or was skipped.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{} unresolved after {} strategies", .descriptor.source_url, .attempts.len())]
pub struct ResolutionFailure {
    #[serde(flatten)]
    pub descriptor: EpisodeDescriptor,
    pub attempts: Vec<StrategyAttempt>,
    pub latency_ms: u64,
}

impl ResolutionFailure {
    pub fn was_cancelled(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.error() == Some(&ResolveError::Cancelled))
    }
}

/// Mutable per-job state shared by the strategies of one chain run.
pub struct JobState<'a> {
    pub ctx: &'a ResolverContext,
    pub descriptor: EpisodeDescriptor,
    /// Source page text, kept even when it carries no usable state.
    pub html: Option<String>,
    /// Source page with parsed state, if it had any.
    pub page: Option<FetchedPage>,
}

pub enum StrategyResult {
    Resolved(Box<PageResolution>),
    Skipped(String),
    Failed(ResolveError),
}

/// One way of turning an episode descriptor into a manifest.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, job: &mut JobState<'_>, cancel: &CancellationToken) -> StrategyResult;
}

/// (1) Fetch the episode page and run the single-page pipeline on it.
pub struct DirectExtraction;

#[async_trait]
impl ResolutionStrategy for DirectExtraction {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectExtraction
    }

    async fn attempt(&self, job: &mut JobState<'_>, cancel: &CancellationToken) -> StrategyResult {
        let url = job.descriptor.source_url.clone();
        let html = match fetch_html(job.ctx, &url, cancel).await {
            Ok(html) => html,
            Err(err) => return StrategyResult::Failed(err),
        };
        job.html = Some(html.clone());
        let page = match FetchedPage::parse(&url, html) {
            Ok(page) => page,
            Err(err) => return StrategyResult::Failed(err),
        };
        job.page = Some(page.clone());
        match resolve_page(job.ctx, &url, Some(page), cancel).await {
            Ok(resolved) => StrategyResult::Resolved(Box::new(resolved)),
            Err(err) => StrategyResult::Failed(err),
        }
    }
}

/// (2) Search the fetched state for other episode lists and resolve the
/// entry with the target ordinal.
pub struct DeepSearch;

#[async_trait]
impl ResolutionStrategy for DeepSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DeepSearch
    }

    async fn attempt(&self, job: &mut JobState<'_>, cancel: &CancellationToken) -> StrategyResult {
        let Some(page) = &job.page else {
            return StrategyResult::Skipped("page state unavailable".into());
        };
        let Some(ordinal) = job.descriptor.ordinal else {
            return StrategyResult::Skipped("target ordinal unknown".into());
        };

        let enumerator = EpisodeEnumerator::new(job.ctx.config().max_episodes);
        let source = job.descriptor.source_url.as_str();
        let mut seen = HashSet::new();
        let candidates: Vec<String> = page
            .state
            .find_arrays(|entry| entry.get(ENTRY_URL_FIELD).is_some())
            .into_iter()
            .flat_map(|entries| enumerator.descriptors(entries, source))
            .filter(|d| d.ordinal == Some(ordinal) && d.source_url != source)
            .map(|d| d.source_url)
            .filter(|url| seen.insert(url.clone()))
            .collect();

        if candidates.is_empty() {
            return StrategyResult::Skipped(format!("no alternate list entry for episode {ordinal}"));
        }
        debug!(count = candidates.len(), "Alternate episode entries found");
        try_candidates(job.ctx, &candidates, cancel).await
    }
}

/// (3) Derive sibling URLs from the ordinal and opaque id, keep the ones
/// that answer a probe.
pub struct UrlPattern;

#[async_trait]
impl ResolutionStrategy for UrlPattern {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UrlPattern
    }

    async fn attempt(&self, job: &mut JobState<'_>, cancel: &CancellationToken) -> StrategyResult {
        if !job.ctx.config().probe_patterns {
            return StrategyResult::Skipped("pattern probing disabled".into());
        }
        let variants = url_variants(&job.descriptor.source_url, job.descriptor.ordinal);
        if variants.is_empty() {
            return StrategyResult::Skipped("url does not follow the episode pattern".into());
        }

        let probes = variants
            .iter()
            .map(|variant| job.ctx.fetcher().probe(variant, cancel));
        let results = futures::future::join_all(probes).await;

        let mut live = Vec::new();
        for (variant, result) in variants.into_iter().zip(results) {
            match result {
                Ok(true) => live.push(variant),
                Ok(false) => debug!(%variant, "Probe missed"),
                Err(ResolveError::Cancelled) => return StrategyResult::Failed(ResolveError::Cancelled),
                Err(err) => debug!(%variant, error = %err, "Probe failed"),
            }
        }
        if live.is_empty() {
            return StrategyResult::Skipped("no generated url answered the probe".into());
        }
        try_candidates(job.ctx, &live, cancel).await
    }
}

/// (4) Scan the page's anchors for links to the target episode.
pub struct HtmlScan;

#[async_trait]
impl ResolutionStrategy for HtmlScan {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HtmlScan
    }

    async fn attempt(&self, job: &mut JobState<'_>, cancel: &CancellationToken) -> StrategyResult {
        let Some(html) = &job.html else {
            return StrategyResult::Skipped("page html unavailable".into());
        };
        let Some(ordinal) = job.descriptor.ordinal else {
            return StrategyResult::Skipped("target ordinal unknown".into());
        };

        let candidates = episode_anchors(html, &job.descriptor.source_url, ordinal);
        if candidates.is_empty() {
            return StrategyResult::Skipped(format!("no anchor matched episode {ordinal}"));
        }
        debug!(count = candidates.len(), "Episode anchors found");
        try_candidates(job.ctx, &candidates, cancel).await
    }
}

/// Resolve candidates in order; the first success wins.
async fn try_candidates(
    ctx: &ResolverContext,
    candidates: &[String],
    cancel: &CancellationToken,
) -> StrategyResult {
    let mut last = ResolveError::NoManifestFound;
    for url in candidates {
        match resolve_page(ctx, url, None, cancel).await {
            Ok(resolved) => return StrategyResult::Resolved(Box::new(resolved)),
            Err(ResolveError::Cancelled) => return StrategyResult::Failed(ResolveError::Cancelled),
            Err(err) => {
                debug!(%url, error = %err, "Candidate failed");
                last = err;
            }
        }
    }
    StrategyResult::Failed(last)
}

/// Sibling URL variants for `/play/{slug}-episode-{n}-{id}`, source excluded.
pub fn url_variants(source_url: &str, ordinal: Option<u32>) -> Vec<String> {
    let Ok(url) = Url::parse(source_url) else {
        return Vec::new();
    };
    let Some(caps) = PLAY_PATH.captures(url.path()) else {
        return Vec::new();
    };
    let slug = &caps["slug"];
    let id = &caps["id"];
    let Some(n) = ordinal.or_else(|| caps["n"].parse().ok()) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    [
        format!("/play/{slug}-episode-{n}-{id}"),
        format!("/play/{slug}-episode-{n:02}-{id}"),
        format!("/play/{slug}-{n}-{id}"),
    ]
    .into_iter()
    .filter(|path| path != url.path() && seen.insert(path.clone()))
    .filter_map(|path| url.join(&path).ok().map(|u| u.to_string()))
    .collect()
}

/// Anchors whose href or text points at episode `ordinal`, source excluded.
pub fn episode_anchors(html: &str, source_url: &str, ordinal: u32) -> Vec<String> {
    let href_pattern = Regex::new(&format!(r"(?i)-episode-0*{ordinal}(?:-|/|\?|$)"));
    let text_pattern = Regex::new(&format!(
        r"(?i)\b(?:episode|ep)\.?\s*0*{ordinal}\b|第\s*{ordinal}\s*[集话]"
    ));
    let (Ok(href_pattern), Ok(text_pattern)) = (href_pattern, text_pattern) else {
        return Vec::new();
    };

    let base = Url::parse(source_url).ok();
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let text: String = a.text().collect();
            (href_pattern.is_match(href) || text_pattern.is_match(text.trim()))
                .then(|| absolute_url(base.as_ref(), href))
                .flatten()
        })
        .filter(|url| url.starts_with("http") && url != source_url && seen.insert(url.clone()))
        .collect()
}

/// Runs the strategy chain for one episode.
pub struct FallbackOrchestrator {
    ctx: ResolverContext,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl FallbackOrchestrator {
    /// Orchestrator with the default four-strategy chain.
    pub fn new(ctx: ResolverContext) -> Self {
        let strategies: Vec<Box<dyn ResolutionStrategy>> = vec![
            Box::new(DirectExtraction),
            Box::new(DeepSearch),
            Box::new(UrlPattern),
            Box::new(HtmlScan),
        ];
        Self::with_strategies(ctx, strategies)
    }

    pub fn with_strategies(ctx: ResolverContext, strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self { ctx, strategies }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.ctx
    }

    /// Run the chain until a strategy succeeds.
    ///
    /// `deadline` bounds the whole job; a strategy still running when it
    /// passes is dropped (aborting its request) and recorded as a timeout.
    #[instrument(skip(self, descriptor, cancel), fields(url = %descriptor.source_url))]
    pub async fn resolve(
        &self,
        descriptor: EpisodeDescriptor,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<EpisodeManifest, ResolutionFailure> {
        let started = Instant::now();
        let mut job = JobState {
            ctx: &self.ctx,
            descriptor,
            html: None,
            page: None,
        };
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let kind = strategy.kind();
            let attempt_start = Instant::now();

            let result = if cancel.is_cancelled() {
                StrategyResult::Failed(ResolveError::Cancelled)
            } else if let Some(deadline) = deadline {
                tokio::time::timeout_at(deadline, strategy.attempt(&mut job, cancel))
                    .await
                    .unwrap_or_else(|_| {
                        StrategyResult::Failed(ResolveError::Timeout {
                            url: job.descriptor.source_url.clone(),
                        })
                    })
            } else {
                strategy.attempt(&mut job, cancel).await
            };
            enrich_descriptor(&mut job);

            let elapsed_ms = millis(attempt_start);
            match result {
                StrategyResult::Resolved(resolved) => {
                    attempts.push(StrategyAttempt {
                        strategy: kind,
                        outcome: AttemptOutcome::Succeeded {
                            url: resolved.page.url.clone(),
                        },
                        elapsed_ms,
                    });
                    let manifest = EpisodeManifest {
                        descriptor: job.descriptor,
                        manifest: resolved.manifest,
                        subtitles: resolved.subtitles,
                        strategy_used: kind,
                        attempted_strategies: attempts,
                        resolved_url: resolved.page.url,
                        latency_ms: millis(started),
                    };
                    info!(
                        strategy = %kind,
                        tvid = %manifest.manifest.tvid,
                        latency_ms = manifest.latency_ms,
                        "Episode resolved"
                    );
                    return Ok(manifest);
                }
                StrategyResult::Skipped(reason) => {
                    debug!(strategy = %kind, %reason, "Strategy skipped");
                    attempts.push(StrategyAttempt {
                        strategy: kind,
                        outcome: AttemptOutcome::Skipped { reason },
                        elapsed_ms,
                    });
                }
                StrategyResult::Failed(error) => {
                    debug!(strategy = %kind, error = %error, "Strategy failed");
                    let stop = matches!(error, ResolveError::Cancelled | ResolveError::Timeout { .. })
                        && (cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d));
                    attempts.push(StrategyAttempt {
                        strategy: kind,
                        outcome: AttemptOutcome::Failed { error },
                        elapsed_ms,
                    });
                    if stop {
                        break;
                    }
                }
            }
        }

        let failure = ResolutionFailure {
            descriptor: job.descriptor,
            attempts,
            latency_ms: millis(started),
        };
        warn!(error = %failure, "Episode unresolved");
        Err(failure)
    }
}

/// Fill in a bare descriptor from the fetched page's own video info.
fn enrich_descriptor(job: &mut JobState<'_>) {
    if !job.descriptor.title.is_empty() {
        return;
    }
    if let Some(page) = &job.page {
        let enumerator = EpisodeEnumerator::new(job.ctx.config().max_episodes);
        job.descriptor = enumerator.current(&page.state, &job.descriptor.source_url);
    }
}

fn millis(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
