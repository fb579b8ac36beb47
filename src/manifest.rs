//! Manifest endpoint client.
//!
//! A signed query is sent once to the manifest endpoint. The JSON envelope is
//! classified into a [`ManifestResponse`], and a successful payload is mined
//! for the playable manifest with four extraction strategies in order:
//!
//! 1. `data.program.video[].m3u8` with the expected shapes
//! 2. the same path tolerating `program`/`video` as object-or-list
//! 3. any string in the tree containing the playlist marker
//! 4. a regex scan of the raw body for absolute media URLs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{ResolveError, Result};
use crate::http_client::PageFetcher;
use crate::signature::ManifestQuery;
use crate::state::{collect_strings, value_at};

pub const SUCCESS_CODE: &str = "A00000";
pub const EXPIRED_CODE: &str = "A00020";

/// Leading marker of an HLS playlist.
pub const PLAYLIST_MARKER: &str = "#EXTM3U";

static MEDIA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s"'\\<>]+?\.(?:m3u8|mpd|f4v|mp4|ts)(?:\?[^\s"'\\<>]*)?"#)
        .expect("media url pattern should compile")
});

/// Successful envelope contents.
#[derive(Debug, Clone, PartialEq)]
pub struct DashPayload {
    /// Whole parsed envelope.
    pub envelope: Value,
    /// Response body as received.
    pub raw_body: String,
}

impl DashPayload {
    /// `data.program.video` entries, flattening object-or-list at both levels.
    pub fn raw_video_entries(&self) -> Vec<&Value> {
        programs(&self.envelope)
            .into_iter()
            .flat_map(|program| as_list(program.get("video")))
            .collect()
    }

    /// `data.program.stl` subtitle descriptors.
    pub fn subtitle_entries(&self) -> Vec<&Value> {
        programs(&self.envelope)
            .into_iter()
            .flat_map(|program| as_list(program.get("stl")))
            .collect()
    }

    /// Host the subtitle fragments are relative to (`data.dm`).
    pub fn subtitle_host(&self) -> Option<&str> {
        value_at(&self.envelope, &["data", "dm"])
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Outcome of one manifest call. Exactly one variant holds.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestResponse {
    Success(DashPayload),
    ExpiredSignature { message: String },
    ApiError { code: String, message: String },
    Malformed { raw_body: String },
}

impl ManifestResponse {
    /// Classify a response body by its envelope `code`.
    pub fn classify(body: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<Value>(body) else {
            return Self::Malformed {
                raw_body: body.to_string(),
            };
        };
        let code = match envelope.get("code") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Self::Malformed {
                    raw_body: body.to_string(),
                }
            }
        };
        let message = envelope
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match code.as_str() {
            SUCCESS_CODE => Self::Success(DashPayload {
                envelope,
                raw_body: body.to_string(),
            }),
            EXPIRED_CODE => Self::ExpiredSignature { message },
            _ => Self::ApiError { code, message },
        }
    }

    /// Terminal variants become their typed error.
    pub fn into_payload(self) -> Result<DashPayload> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::ExpiredSignature { message } => Err(ResolveError::ExpiredSignature { message }),
            Self::ApiError { code, message } => Err(ResolveError::Api { code, message }),
            Self::Malformed { raw_body } => Err(ResolveError::MalformedManifest { raw_body }),
        }
    }
}

/// Playable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ManifestContent {
    /// Literal playlist text.
    Playlist(String),
    /// A single direct media URL.
    MediaUrl(String),
}

impl ManifestContent {
    fn from_field(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::MediaUrl(trimmed.to_string())
        } else {
            Self::Playlist(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Playlist(s) | Self::MediaUrl(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    FixedPath,
    TolerantPath,
    TreeSearch,
    RawScan,
}

/// Resolved manifest bound to the episode identifier it was fetched for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamManifest {
    pub tvid: String,
    pub content: ManifestContent,
    pub extraction: ExtractionStrategy,
}

/// Issues signed manifest requests.
#[derive(Debug, Clone)]
pub struct ManifestClient {
    endpoint: String,
}

impl ManifestClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// One GET with `query` appended verbatim. HTTP-level failures surface
    /// as fetch errors; API-level outcomes come back classified.
    #[instrument(skip(self, fetcher, query, cancel), fields(tvid = %query.tvid))]
    pub async fn request(
        &self,
        fetcher: &PageFetcher,
        query: &ManifestQuery,
        referer: &str,
        cancel: &CancellationToken,
    ) -> Result<ManifestResponse> {
        let response = fetcher
            .fetch_api(&query.url(&self.endpoint), referer, cancel)
            .await?;
        let classified = ManifestResponse::classify(&response.body);
        match &classified {
            ManifestResponse::Success(_) => debug!("Manifest envelope accepted"),
            ManifestResponse::ExpiredSignature { message } => {
                info!(%message, "Signed query expired");
            }
            ManifestResponse::ApiError { code, message } => {
                info!(%code, %message, "Manifest API error");
            }
            ManifestResponse::Malformed { raw_body } => {
                debug!(len = raw_body.len(), "Malformed manifest envelope");
            }
        }
        Ok(classified)
    }
}

/// Pull the playable manifest out of a successful payload.
pub fn extract_manifest(payload: &DashPayload, tvid: &str) -> Result<StreamManifest> {
    let found = fixed_path(&payload.envelope)
        .map(|v| (v, ExtractionStrategy::FixedPath))
        .or_else(|| {
            select_entry(&payload.raw_video_entries()).map(|v| (v, ExtractionStrategy::TolerantPath))
        })
        .map(|(v, strategy)| (ManifestContent::from_field(v), strategy))
        .or_else(|| {
            tree_search(&payload.envelope)
                .map(|v| (ManifestContent::Playlist(v.to_string()), ExtractionStrategy::TreeSearch))
        })
        .or_else(|| {
            raw_scan(&payload.raw_body).map(|v| (ManifestContent::MediaUrl(v), ExtractionStrategy::RawScan))
        });

    let (content, extraction) = found.ok_or(ResolveError::NoManifestFound)?;
    debug!(?extraction, "Manifest extracted");
    Ok(StreamManifest {
        tvid: tvid.to_string(),
        content,
        extraction,
    })
}

fn fixed_path(envelope: &Value) -> Option<&str> {
    let videos = value_at(envelope, &["data", "program", "video"])?.as_array()?;
    select_entry(&videos.iter().collect::<Vec<_>>())
}

/// The `_selected` entry carrying a manifest wins, else the first with one.
fn select_entry<'a>(entries: &[&'a Value]) -> Option<&'a str> {
    let manifest_of = |entry: &&'a Value| -> Option<&'a str> {
        entry
            .get("m3u8")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    };
    entries
        .iter()
        .filter(|e| e.get("_selected").and_then(Value::as_bool).unwrap_or(false))
        .find_map(manifest_of)
        .or_else(|| entries.iter().find_map(manifest_of))
}

fn tree_search(envelope: &Value) -> Option<&str> {
    let mut found = Vec::new();
    collect_strings(envelope, &|s: &str| s.contains(PLAYLIST_MARKER), &mut found);
    found.into_iter().next()
}

fn raw_scan(body: &str) -> Option<String> {
    let urls: Vec<&str> = MEDIA_URL.find_iter(body).map(|m| m.as_str()).collect();
    urls.iter()
        .find(|u| u.contains(".m3u8"))
        .or_else(|| urls.first())
        .map(|u| (*u).to_string())
}

fn programs(envelope: &Value) -> Vec<&Value> {
    as_list(value_at(envelope, &["data", "program"]))
}

fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}
