//! Resolution error taxonomy.
//!
//! Every component reports failures through [`ResolveError`]. Fetch-level
//! variants (`Network`, `Timeout`, `HttpStatus`, `RateLimited`, `Cancelled`)
//! are what [`PageFetcher`](crate::http_client::PageFetcher) hands back once
//! its local retry budget is spent; the rest are terminal outcomes of the
//! extraction pipeline that the fallback orchestrator records per strategy.

use thiserror::Error;

/// Resolution pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {url}")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("rate limited by upstream: {url}")]
    RateLimited { url: String },

    #[error("cancelled")]
    Cancelled,

    #[error("page has no embedded hydration state")]
    NoEmbeddedState,

    #[error("embedded state is not valid JSON: {0}")]
    MalformedState(String),

    #[error("no signed manifest query found in page state")]
    SignatureNotFound,

    #[error("manifest signature expired: {message}")]
    ExpiredSignature { message: String },

    #[error("manifest API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("manifest response is not a JSON envelope")]
    MalformedManifest { raw_body: String },

    #[error("no playable manifest in response")]
    NoManifestFound,

    #[error("no episode list in page state")]
    EpisodeListNotFound,

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ResolveError {
    /// Whether the fetcher may retry the request that produced this error.
    ///
    /// 4xx statuses are terminal; 5xx, timeouts and transport failures are
    /// transient. Rate limiting is handled separately by the throttle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Short machine-readable name, used in provenance records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::HttpStatus { .. } => "http_status",
            Self::RateLimited { .. } => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::NoEmbeddedState => "no_embedded_state",
            Self::MalformedState(_) => "malformed_state",
            Self::SignatureNotFound => "signature_not_found",
            Self::ExpiredSignature { .. } => "expired_signature",
            Self::Api { .. } => "api_error",
            Self::MalformedManifest { .. } => "malformed_manifest",
            Self::NoManifestFound => "no_manifest_found",
            Self::EpisodeListNotFound => "episode_list_not_found",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(ToString::to_string).unwrap_or_default();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                status: status.as_u16(),
                url,
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
