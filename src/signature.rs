//! Signed manifest query discovery.
//!
//! The page's diagnostic log (`ssrlog`) contains the full signed request the
//! player made against the manifest endpoint. The host has moved more than
//! once, so [`SIGNATURE_PATTERNS`] is tried newest first and the first
//! pattern with a usable match wins. Pages without the log fall back to a
//! whole-tree search for any string carrying both `tvid=` and `vid=`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{ResolveError, Result};
use crate::state::PageState;

/// Location of the diagnostic log inside the hydration payload.
pub const DIAGNOSTIC_PATH: &[&str] = &["props", "initialProps", "pageProps", "prePlayerData", "ssrlog"];

/// Signed-query patterns, newest platform first. Group 1 is the query string.
pub static SIGNATURE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"https://cache\.video\.iqiyi\.com/dash\?([^\s"'\\<>]+)"#,
        r#"http://intel-cache\.video\.qiyi\.domain/dash\?([^\s"'\\<>]+)"#,
        r#"https?://[A-Za-z0-9.-]*\.iqiyi\.com/dash\?([^\s"'\\<>]+)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("signature pattern should compile"))
    .collect()
});

/// Host-less form accepted only by the whole-tree search.
static BARE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"dash\?([^\s"'\\<>]+)"#).expect("bare signature pattern should compile")
});

/// A time-bound signed query for the manifest endpoint.
///
/// Validity is never computed locally; only the endpoint can declare it expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestQuery {
    /// Query string exactly as found, without the leading `?`.
    pub query: String,
    /// Per-episode content identifier carried in the query.
    pub tvid: String,
    pub vid: Option<String>,
    /// Platform signing time (`tm`, epoch milliseconds) when present.
    pub signed_at_ms: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl ManifestQuery {
    /// Parse a raw query string. Returns `None` without a non-empty `tvid`.
    pub fn parse(raw: &str) -> Option<Self> {
        let query = raw.trim_start_matches('?').trim_end_matches(['&', '.', ',', ';']);
        let mut tvid = None;
        let mut vid = None;
        let mut tm = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "tvid" if !value.is_empty() => tvid = Some(value.into_owned()),
                "vid" if !value.is_empty() => vid = Some(value.into_owned()),
                "tm" => tm = value.parse().ok(),
                _ => {}
            }
        }
        Some(Self {
            query: query.to_string(),
            tvid: tvid?,
            vid,
            signed_at_ms: tm,
            captured_at: Utc::now(),
        })
    }

    /// Full request URL against `endpoint`, query copied verbatim.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}?{}", endpoint.trim_end_matches('?'), self.query)
    }

    /// Timestamp used for the subtitle `qd_tm` parameter.
    pub fn timestamp_ms(&self) -> i64 {
        self.signed_at_ms
            .and_then(|tm| i64::try_from(tm).ok())
            .unwrap_or_else(|| self.captured_at.timestamp_millis())
    }
}

/// Finds the signed query in a [`PageState`].
pub struct SignatureLocator;

impl SignatureLocator {
    #[instrument(skip(state))]
    pub fn locate(state: &PageState) -> Result<ManifestQuery> {
        if let Some(log) = state.str_at(DIAGNOSTIC_PATH) {
            debug!(len = log.len(), "Searching diagnostic log");
            return first_pattern_match(log, SIGNATURE_PATTERNS.iter())
                .ok_or(ResolveError::SignatureNotFound);
        }

        debug!("Diagnostic log absent, searching whole state");
        let candidates = state.find_strings(|s| s.contains("tvid=") && s.contains("vid="));
        let patterns: Vec<&Regex> = SIGNATURE_PATTERNS.iter().chain(std::iter::once(&*BARE_PATTERN)).collect();
        for candidate in candidates {
            if let Some(query) = first_pattern_match(candidate, patterns.iter().copied()) {
                return Ok(query);
            }
            if let Some(query) = ManifestQuery::parse(candidate.trim()) {
                if !candidate.contains(char::is_whitespace) {
                    return Ok(query);
                }
            }
        }
        Err(ResolveError::SignatureNotFound)
    }
}

fn first_pattern_match<'a, I>(text: &str, patterns: I) -> Option<ManifestQuery>
where
    I: IntoIterator<Item = &'a Regex>,
{
    patterns.into_iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| ManifestQuery::parse(m.as_str()))
    })
}
