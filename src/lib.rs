//! `iqresolve` - episode page to playable manifest resolver
//!
//! # Features
//!
//! - **Signed manifest lookup**: finds the time-bound query in the page's hydration payload
//!   and calls the manifest endpoint with it, re-fetching the page once when it has expired
//! - **Per-episode subtitles**: every track URL is bound to its own episode's `tvid`
//! - **Fallback chain**: direct extraction, deep search, URL patterns, HTML scan
//! - **Series resolution**: bounded worker pool with shared throttling and per-job deadlines
//!
//! # Example
//!
//! ```rust,no_run
//! use iqresolve::{EpisodeDescriptor, FallbackOrchestrator, ResolverConfig, ResolverContext};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = ResolverContext::new(ResolverConfig::default())?;
//!     let orchestrator = FallbackOrchestrator::new(ctx);
//!     let descriptor = EpisodeDescriptor::from_url("https://www.iq.com/play/some-show-episode-1-abc");
//!     let manifest = orchestrator.resolve(descriptor, None, &CancellationToken::new()).await?;
//!     println!("{}", manifest.manifest.content.as_str());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod episode;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod fingerprint;
pub mod http_client;
pub mod manifest;
pub mod pool;
pub mod retry;
pub mod signature;
pub mod state;
pub mod subtitle;
pub mod transport;

pub use catalog::{CatalogSink, JsonLinesSink, MemorySink};
pub use config::ResolverConfig;
pub use context::ResolverContext;
pub use episode::{classify, ContentType, EpisodeDescriptor, EpisodeEnumerator, SeriesListing};
pub use error::{ResolveError, Result};
pub use fallback::{
    AttemptOutcome, EpisodeManifest, FallbackOrchestrator, ResolutionFailure, ResolutionStrategy,
    StrategyAttempt, StrategyKind,
};
pub use fingerprint::{random_profile, BrowserProfile};
pub use http_client::PageFetcher;
pub use manifest::{ManifestClient, ManifestContent, ManifestResponse, StreamManifest};
pub use pool::{EpisodeFilter, JobOutcome, SeriesReport, SeriesResolver};
pub use retry::{BackoffPolicy, Throttle};
pub use signature::{ManifestQuery, SignatureLocator};
pub use state::{PageState, StateExtractor};
pub use subtitle::{SubtitleFormat, SubtitleResolver, SubtitleTrack};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Version of iqresolve
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
