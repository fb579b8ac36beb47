//! Single-page extraction.
//!
//! page → state → signature → manifest call → manifest + subtitles, all for
//! one episode URL. When the endpoint reports the signature expired, the page
//! is fetched again for a fresh one (once, if enabled). The stale query is
//! never sent twice.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::ResolverContext;
use crate::episode::page_url;
use crate::error::{ResolveError, Result};
use crate::manifest::{extract_manifest, DashPayload, ManifestClient, StreamManifest};
use crate::signature::{ManifestQuery, SignatureLocator};
use crate::state::{PageState, StateExtractor};
use crate::subtitle::{build_tracks, SubtitleTrack};

/// A fetched page and its parsed state.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub state: PageState,
}

/// Manifest payload together with the query and page that produced it.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub page: FetchedPage,
    pub query: ManifestQuery,
    pub payload: DashPayload,
}

/// Everything resolved from one episode page.
#[derive(Debug, Clone)]
pub struct PageResolution {
    pub page: FetchedPage,
    pub query: ManifestQuery,
    pub manifest: StreamManifest,
    pub subtitles: Vec<SubtitleTrack>,
}

impl FetchedPage {
    /// Parse already-fetched page text.
    pub fn parse(url: &str, html: String) -> Result<Self> {
        let state = StateExtractor::extract(&html)?;
        Ok(Self {
            url: url.to_string(),
            html,
            state,
        })
    }
}

/// Raw page text for a validated page URL.
pub async fn fetch_html(ctx: &ResolverContext, url: &str, cancel: &CancellationToken) -> Result<String> {
    page_url(url)?;
    ctx.fetcher().fetch_text(url, cancel).await
}

pub async fn fetch_page(
    ctx: &ResolverContext,
    url: &str,
    cancel: &CancellationToken,
) -> Result<FetchedPage> {
    let html = fetch_html(ctx, url, cancel).await?;
    FetchedPage::parse(url, html)
}

/// Obtain a successful manifest payload for `url`.
///
/// `prefetched` is used for the first pass instead of fetching the page.
#[instrument(skip(ctx, prefetched, cancel))]
pub async fn signed_payload(
    ctx: &ResolverContext,
    url: &str,
    prefetched: Option<FetchedPage>,
    cancel: &CancellationToken,
) -> Result<SignedPayload> {
    let client = ManifestClient::new(ctx.config().manifest_endpoint.as_str());
    let max_passes = if ctx.config().refresh_on_expiry { 2 } else { 1 };
    let mut page = match prefetched {
        Some(page) => page,
        None => fetch_page(ctx, url, cancel).await?,
    };
    let mut pass = 1;
    let mut stale: Option<String> = None;

    loop {
        let query = SignatureLocator::locate(&page.state)?;
        if stale.as_deref() == Some(query.query.as_str()) {
            return Err(ResolveError::ExpiredSignature {
                message: "refetched page still carries the expired signature".to_string(),
            });
        }
        debug!(tvid = %query.tvid, pass, "Signed query located");

        match client.request(ctx.fetcher(), &query, url, cancel).await?.into_payload() {
            Ok(payload) => {
                return Ok(SignedPayload {
                    page,
                    query,
                    payload,
                })
            }
            Err(ResolveError::ExpiredSignature { message }) if pass < max_passes => {
                warn!(tvid = %query.tvid, %message, "Signature expired, refetching page");
                stale = Some(query.query);
                pass += 1;
                page = fetch_page(ctx, url, cancel).await?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Resolve the manifest and the subtitle tracks of one page.
///
/// Both come from the same manifest response, so every track is bound to
/// the `tvid` of the returned manifest.
#[instrument(skip(ctx, prefetched, cancel))]
pub async fn resolve_page(
    ctx: &ResolverContext,
    url: &str,
    prefetched: Option<FetchedPage>,
    cancel: &CancellationToken,
) -> Result<PageResolution> {
    let signed = signed_payload(ctx, url, prefetched, cancel).await?;
    let manifest = extract_manifest(&signed.payload, &signed.query.tvid)?;
    let config = ctx.config();
    let subtitles = build_tracks(
        &signed.payload,
        &signed.query,
        &config.subtitle_formats,
        &config.subtitle_base,
    );
    info!(
        tvid = %manifest.tvid,
        extraction = ?manifest.extraction,
        subtitles = subtitles.len(),
        "Page resolved"
    );
    Ok(PageResolution {
        page: signed.page,
        query: signed.query,
        manifest,
        subtitles,
    })
}
