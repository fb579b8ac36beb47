//! Episode discovery and classification.
//!
//! The series page carries its playlist under
//! `props.initialState.play.cachePlayList."1"`. Each entry becomes an
//! [`EpisodeDescriptor`] with an absolute URL, a heuristically inferred
//! [`ContentType`] and best-effort metadata.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::context::ResolverContext;
use crate::error::{ResolveError, Result};
use crate::state::{PageState, StateExtractor};

pub const EPISODE_LIST_PATH: &[&str] = &["props", "initialState", "play", "cachePlayList", "1"];
pub const CURRENT_VIDEO_PATH: &[&str] = &["props", "initialState", "play", "curVideoInfo"];
/// Entry field holding the episode page URL.
pub const ENTRY_URL_FIELD: &str = "albumPlayUrl";

const ALBUM_PATHS: &[&[&str]] = &[
    &["props", "initialState", "album", "videoAlbumInfo"],
    &["props", "initialProps", "pageProps", "videoAlbumInfo"],
    &["props", "initialProps", "pageProps", "albumInfo"],
    &["props", "initialState", "play", "albumInfo"],
];

const TITLE_FIELDS: &[&str] = &["subTitle", "name", "title", "shortTitle"];
const DESCRIPTION_FIELDS: &[&str] = &["description", "desc", "briefDesc", "intro", "summary", "synopsis"];
const THUMBNAIL_FIELDS: &[&str] = &[
    "thumbnail", "poster", "image", "cover", "pic", "img", "picUrl", "imageUrl", "posterUrl",
    "coverUrl", "thumbUrl", "vpic", "imgUrl",
];
const DURATION_FIELDS: &[&str] = &["duration", "playTime", "len", "length", "totalTime", "runTime"];
const COUNT_FIELDS: &[&str] = &["episodeCount", "total", "videoCount", "maxOrder"];
const PLACEHOLDERS: &[&str] = &["null", "none", "undefined", ""];

static PREVIEW_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:preview|trailer|teaser|promo|sneak peek)\b|预告|花絮|预览")
        .expect("preview keywords should compile")
});
static EPISODE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:episode|ep)\b|第.*[集话]").expect("episode keywords should compile")
});
static ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:episode|ep|e)\.?\s*(\d{1,4})\b|第\s*(\d{1,4})\s*[集话]|^\s*(\d{1,4})\s*$)")
        .expect("ordinal pattern should compile")
});
static URL_ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-episode-0*(\d{1,4})-").expect("url ordinal pattern should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Episode,
    Preview,
    Trailer,
    Unknown,
}

impl ContentType {
    /// Previews and trailers.
    pub fn is_preview(self) -> bool {
        matches!(self, Self::Preview | Self::Trailer)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Episode => "episode",
            Self::Preview => "preview",
            Self::Trailer => "trailer",
            Self::Unknown => "unknown",
        };
        f.pad(name)
    }
}

/// Classify an entry by its title and name.
///
/// Tested in order: preview/trailer keywords, episode keywords, a numeric
/// ordinal. Nothing matching is [`ContentType::Unknown`]. Trailer wording
/// classifies as [`ContentType::Preview`]; `Trailer` stays in the catalog
/// vocabulary but is never inferred from text.
pub fn classify(title: &str, name: &str) -> ContentType {
    let texts = [title, name];
    let any = |re: &Regex| texts.iter().any(|t| re.is_match(t));

    if any(&PREVIEW_KEYWORDS) {
        ContentType::Preview
    } else if any(&EPISODE_KEYWORDS) || any(&ORDINAL) {
        ContentType::Episode
    } else {
        ContentType::Unknown
    }
}

/// Episode number written in a title, if any.
pub fn title_ordinal(title: &str) -> Option<u32> {
    let caps = ORDINAL.captures(title)?;
    (1..=3)
        .find_map(|i| caps.get(i))
        .and_then(|m| m.as_str().parse().ok())
}

/// Episode number encoded in a `/play/{slug}-episode-{n}-{id}` URL.
pub fn url_ordinal(url: &str) -> Option<u32> {
    URL_ORDINAL
        .captures(url)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeDescriptor {
    pub title: String,
    /// Position among episodes; unset for previews.
    pub ordinal: Option<u32>,
    pub source_url: String,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl EpisodeDescriptor {
    /// Minimal descriptor for a bare URL, before anything is known about it.
    pub fn from_url(url: &str) -> Self {
        Self {
            title: String::new(),
            ordinal: url_ordinal(url),
            source_url: url.to_string(),
            content_type: ContentType::Unknown,
            description: None,
            thumbnail: None,
            duration: None,
        }
    }
}

/// Everything the series page says about its episodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesListing {
    pub title: Option<String>,
    /// Episode count the platform advertises, which may exceed the list length.
    pub total_advertised: Option<u32>,
    pub episodes: Vec<EpisodeDescriptor>,
}

impl SeriesListing {
    pub fn episodes_only(&self) -> Vec<&EpisodeDescriptor> {
        self.episodes
            .iter()
            .filter(|e| e.content_type == ContentType::Episode)
            .collect()
    }

    pub fn previews_only(&self) -> Vec<&EpisodeDescriptor> {
        self.episodes
            .iter()
            .filter(|e| e.content_type.is_preview())
            .collect()
    }
}

/// Builds descriptors from page state.
#[derive(Debug, Clone)]
pub struct EpisodeEnumerator {
    max_episodes: usize,
}

impl EpisodeEnumerator {
    pub fn new(max_episodes: usize) -> Self {
        Self { max_episodes }
    }

    /// Fetch `series_url` and enumerate its playlist.
    #[instrument(skip(self, ctx, cancel))]
    pub async fn list(
        &self,
        ctx: &ResolverContext,
        series_url: &str,
        cancel: &CancellationToken,
    ) -> Result<SeriesListing> {
        let html = ctx.fetcher().fetch_text(series_url, cancel).await?;
        let state = StateExtractor::extract(&html)?;
        let listing = self.enumerate(&state, series_url)?;
        info!(
            episodes = listing.episodes_only().len(),
            previews = listing.previews_only().len(),
            total = listing.episodes.len(),
            "Series enumerated"
        );
        Ok(listing)
    }

    /// Enumerate the primary playlist of an already-parsed page.
    pub fn enumerate(&self, state: &PageState, page_url: &str) -> Result<SeriesListing> {
        let entries = state
            .array_at(EPISODE_LIST_PATH)
            .filter(|list| !list.is_empty())
            .ok_or(ResolveError::EpisodeListNotFound)?;

        Ok(SeriesListing {
            title: album_title(state),
            total_advertised: advertised_total(state),
            episodes: self.descriptors(entries, page_url),
        })
    }

    /// Descriptors for a raw list of playlist entries.
    pub fn descriptors(&self, entries: &[Value], page_url: &str) -> Vec<EpisodeDescriptor> {
        let base = Url::parse(page_url).ok();
        let mut episode_count: u32 = 0;

        entries
            .iter()
            .filter_map(|entry| {
                let raw_url = entry.get(ENTRY_URL_FIELD).and_then(Value::as_str)?;
                match absolute_url(base.as_ref(), raw_url) {
                    Some(source_url) => Some((entry, source_url)),
                    None => {
                        debug!(%raw_url, "Skipping entry with unusable URL");
                        None
                    }
                }
            })
            .take(self.max_episodes)
            .map(|(entry, source_url)| {
                let title = first_text(entry, TITLE_FIELDS).unwrap_or_default();
                let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
                let content_type = classify(&title, name);

                let ordinal = match content_type {
                    ContentType::Episode => {
                        episode_count += 1;
                        Some(entry_order(entry).or_else(|| title_ordinal(&title)).unwrap_or(episode_count))
                    }
                    ContentType::Unknown => entry_order(entry),
                    ContentType::Preview | ContentType::Trailer => None,
                };

                // Only numbered episodes get a generated title.
                let title = match (title.is_empty(), content_type, ordinal) {
                    (true, ContentType::Episode, Some(n)) => format!("Episode {n}"),
                    _ => title,
                };

                EpisodeDescriptor {
                    title,
                    ordinal,
                    source_url,
                    content_type,
                    description: first_text(entry, DESCRIPTION_FIELDS),
                    thumbnail: thumbnail(entry),
                    duration: duration(entry),
                }
            })
            .collect()
    }

    /// Descriptor for the page's own video, used when resolving a single URL.
    pub fn current(&self, state: &PageState, page_url: &str) -> EpisodeDescriptor {
        let mut descriptor = EpisodeDescriptor::from_url(page_url);
        let Some(info) = state.get(CURRENT_VIDEO_PATH) else {
            return descriptor;
        };

        let title = first_text(info, TITLE_FIELDS).unwrap_or_default();
        let name = info.get("name").and_then(Value::as_str).unwrap_or_default();
        descriptor.content_type = classify(&title, name);
        if !descriptor.content_type.is_preview() {
            descriptor.ordinal = entry_order(info)
                .or_else(|| title_ordinal(&title))
                .or(descriptor.ordinal);
        } else {
            descriptor.ordinal = None;
        }
        descriptor.title = title;
        descriptor.description = first_text(info, DESCRIPTION_FIELDS);
        descriptor.thumbnail = thumbnail(info);
        descriptor.duration = duration(info);
        descriptor
    }
}

/// Resolve protocol-relative and path-relative entry URLs against the page.
pub fn absolute_url(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok().map(|u| u.to_string()),
        Err(_) => None,
    }
}

/// Parse a caller-supplied page URL. Only absolute http(s) URLs are accepted.
pub fn page_url(raw: &str) -> Result<Url> {
    let invalid = |reason: String| ResolveError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(invalid("missing host".into())),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

fn album_title(state: &PageState) -> Option<String> {
    ALBUM_PATHS
        .iter()
        .filter_map(|path| state.get(path))
        .find_map(|album| first_text(album, &["name", "title", "albumName"]))
        .or_else(|| {
            state
                .get(CURRENT_VIDEO_PATH)
                .and_then(|info| first_text(info, &["albumName"]))
        })
}

fn advertised_total(state: &PageState) -> Option<u32> {
    ALBUM_PATHS
        .iter()
        .filter_map(|path| state.get(path))
        .find_map(|album| COUNT_FIELDS.iter().find_map(|f| number(album.get(*f)?)))
}

fn entry_order(entry: &Value) -> Option<u32> {
    entry.get("order").and_then(number).filter(|n| *n > 0)
}

fn number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn meaningful(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if PLACEHOLDERS.contains(&text.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(text)
    }
}

/// First meaningful value among `fields`, then the same fields one object deeper.
fn first_text(entry: &Value, fields: &[&str]) -> Option<String> {
    let direct = fields.iter().find_map(|f| entry.get(*f).and_then(meaningful));
    direct.or_else(|| {
        entry
            .as_object()?
            .values()
            .filter(|v| v.is_object())
            .find_map(|nested| fields.iter().find_map(|f| nested.get(*f).and_then(meaningful)))
    })
}

fn thumbnail(entry: &Value) -> Option<String> {
    let looks_like_url = |s: &String| {
        ["http://", "https://", "//", "/", "data:"]
            .iter()
            .any(|p| s.starts_with(p))
    };
    let direct = THUMBNAIL_FIELDS
        .iter()
        .filter_map(|f| entry.get(*f).and_then(meaningful))
        .find(looks_like_url);
    direct.or_else(|| {
        entry
            .as_object()?
            .values()
            .filter(|v| v.is_object())
            .find_map(|nested| {
                THUMBNAIL_FIELDS
                    .iter()
                    .filter_map(|f| nested.get(*f).and_then(meaningful))
                    .find(looks_like_url)
            })
    })
}

fn duration(entry: &Value) -> Option<String> {
    DURATION_FIELDS.iter().find_map(|f| {
        let value = entry.get(*f)?;
        match value {
            Value::Number(n) => n.as_u64().filter(|s| *s > 0).map(format_seconds),
            Value::String(s) if s.contains(':') => meaningful(value),
            Value::String(s) => s.trim().parse::<u64>().ok().filter(|s| *s > 0).map(format_seconds),
            _ => None,
        }
    })
}

/// `m:ss` rendering of a duration in seconds.
pub fn format_seconds(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
