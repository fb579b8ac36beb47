//! Per-episode subtitle tracks.
//!
//! Subtitle descriptors come from the same manifest response as the stream,
//! and every track URL is stamped with the owning episode's `tvid` as
//! `qd_tvid`. Any `qd_tvid` already present in a fragment is replaced, so a
//! track can never point at a sibling episode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use crate::context::ResolverContext;
use crate::error::Result;
use crate::extract::signed_payload;
use crate::manifest::DashPayload;
use crate::signature::ManifestQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
    Xml,
}

impl SubtitleFormat {
    /// Descriptor key holding this format's fragment.
    pub fn key(self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::WebVtt => "webvtt",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SubtitleFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "webvtt" | "vtt" => Ok(Self::WebVtt),
            "xml" => Ok(Self::Xml),
            other => Err(format!("unknown subtitle format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleTrack {
    pub language: String,
    pub language_code: String,
    pub format: SubtitleFormat,
    pub url: String,
}

impl SubtitleTrack {
    /// The `qd_tvid` value embedded in the track URL.
    pub fn bound_tvid(&self) -> Option<String> {
        Url::parse(&self.url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "qd_tvid")
                .map(|(_, v)| v.into_owned())
        })
    }
}

/// Build the tracks for one episode from its own manifest payload.
///
/// `query` must be the signed query that produced `payload`; its `tvid` is
/// the only identifier written into the URLs. An empty descriptor list
/// yields an empty vector.
pub fn build_tracks(
    payload: &DashPayload,
    query: &ManifestQuery,
    formats: &[SubtitleFormat],
    default_base: &str,
) -> Vec<SubtitleTrack> {
    let base = payload.subtitle_host().unwrap_or(default_base);
    let mut tracks = Vec::new();

    for entry in payload.subtitle_entries() {
        let language = text_field(entry, &["_name", "name"]).unwrap_or_else(|| "Unknown".to_string());
        let language_code = text_field(entry, &["lid", "language_code"]).unwrap_or_default();

        for &format in formats {
            let Some(fragment) = entry.get(format.key()).and_then(Value::as_str) else {
                continue;
            };
            if fragment.trim().is_empty() {
                continue;
            }
            match track_url(base, fragment, &query.tvid, query.timestamp_ms(), &language_code) {
                Some(url) => tracks.push(SubtitleTrack {
                    language: language.clone(),
                    language_code: language_code.clone(),
                    format,
                    url,
                }),
                None => warn!(%fragment, %format, "Dropping subtitle track with unusable URL"),
            }
        }
    }
    tracks
}

/// Absolute track URL with the episode binding applied.
pub fn track_url(base: &str, fragment: &str, tvid: &str, timestamp_ms: i64, lid: &str) -> Option<String> {
    let fragment = fragment.trim();
    let absolute = if fragment.starts_with("http://") || fragment.starts_with("https://") {
        fragment.to_string()
    } else if let Some(rest) = fragment.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("{}/{}", base.trim_end_matches('/'), fragment.trim_start_matches('/'))
    };

    let mut url = Url::parse(&absolute).ok()?;
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "qd_tvid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let has = |key: &str| existing.iter().any(|(k, _)| k == key);
    let needs_uid = !has("qd_uid");
    let needs_tm = !has("qd_tm");
    let needs_lid = !has("lid") && !lid.is_empty();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        if needs_uid {
            pairs.append_pair("qd_uid", "0");
        }
        if needs_tm {
            pairs.append_pair("qd_tm", &timestamp_ms.to_string());
        }
        for (k, v) in &existing {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("qd_tvid", tvid);
        if needs_lid {
            pairs.append_pair("lid", lid);
        }
    }
    Some(url.to_string())
}

fn text_field(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match entry.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Resolves subtitle tracks for a single episode page.
pub struct SubtitleResolver<'a> {
    ctx: &'a ResolverContext,
}

impl<'a> SubtitleResolver<'a> {
    pub fn new(ctx: &'a ResolverContext) -> Self {
        Self { ctx }
    }

    /// Fetch the episode's own page, signature and manifest response, then
    /// build its tracks in the requested formats.
    #[instrument(skip(self, formats, cancel))]
    pub async fn resolve(
        &self,
        source_url: &str,
        formats: &[SubtitleFormat],
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleTrack>> {
        let signed = signed_payload(self.ctx, source_url, None, cancel).await?;
        let tracks = build_tracks(&signed.payload, &signed.query, formats, &self.ctx.config().subtitle_base);
        info!(tvid = %signed.query.tvid, count = tracks.len(), "Subtitle tracks resolved");
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestResponse;
    use serde_json::json;

    const ALL: [SubtitleFormat; 3] = [SubtitleFormat::Srt, SubtitleFormat::WebVtt, SubtitleFormat::Xml];

    fn payload(envelope: &Value) -> DashPayload {
        ManifestResponse::classify(&envelope.to_string())
            .into_payload()
            .unwrap()
    }

    fn query(tvid: &str) -> ManifestQuery {
        ManifestQuery::parse(&format!("tvid={tvid}&vid=v&tm=1731601534609")).unwrap()
    }

    #[test]
    fn path_fragment_gets_episode_binding() {
        let url = track_url(
            "http://meta.video.iqiyi.com",
            "/20241113/ee/0a/abc.srt",
            "1373007121394700",
            1_731_601_534_609,
            "1",
        )
        .unwrap();
        assert_eq!(
            url,
            "http://meta.video.iqiyi.com/20241113/ee/0a/abc.srt?qd_uid=0&qd_tm=1731601534609&qd_tvid=1373007121394700&lid=1"
        );
    }

    #[test]
    fn foreign_tvid_is_replaced() {
        let url = track_url(
            "http://meta.video.iqiyi.com",
            "/a.srt?qd_tvid=999&qd_uid=0",
            "123",
            5,
            "",
        )
        .unwrap();
        assert!(url.contains("qd_tvid=123"));
        assert!(!url.contains("qd_tvid=999"));
        assert_eq!(url.matches("qd_uid").count(), 1);
    }

    #[test]
    fn protocol_relative_and_absolute_fragments() {
        let a = track_url("http://unused", "//cdn.example/x.vtt", "7", 1, "2").unwrap();
        assert!(a.starts_with("https://cdn.example/x.vtt?"));
        let b = track_url("http://unused", "https://cdn.example/y.xml", "7", 1, "2").unwrap();
        assert!(b.starts_with("https://cdn.example/y.xml?"));
        assert!(b.ends_with("qd_tvid=7&lid=2"));
    }

    #[test]
    fn every_track_carries_its_own_tvid() {
        let p = payload(&json!({"code": "A00000", "data": {
            "dm": "http://meta.video.iqiyi.com",
            "program": {"stl": [
                {"_name": "English", "lid": 3, "srt": "/en.srt", "webvtt": "/en.vtt", "xml": "/en.xml"},
                {"name": "Bahasa", "lid": 21, "srt": "/id.srt?qd_tvid=555"}
            ]}
        }}));
        let tracks = build_tracks(&p, &query("4242"), &ALL, "http://fallback");
        assert_eq!(tracks.len(), 4);
        for track in &tracks {
            assert_eq!(track.bound_tvid().as_deref(), Some("4242"));
            assert!(track.url.starts_with("http://meta.video.iqiyi.com/"));
        }
        assert_eq!(tracks[0].language, "English");
        assert_eq!(tracks[0].language_code, "3");
        assert_eq!(tracks[3].language, "Bahasa");
    }

    #[test]
    fn format_filter_is_respected() {
        let p = payload(&json!({"code": "A00000", "data": {"program": {"stl": [
            {"_name": "English", "lid": 3, "srt": "/en.srt", "webvtt": "/en.vtt"}
        ]}}}));
        let tracks = build_tracks(&p, &query("1"), &[SubtitleFormat::WebVtt], "http://meta.video.iqiyi.com");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].format, SubtitleFormat::WebVtt);
    }

    #[test]
    fn missing_descriptors_yield_empty_list() {
        let p = payload(&json!({"code": "A00000", "data": {"program": {"video": []}}}));
        assert!(build_tracks(&p, &query("1"), &ALL, "http://meta.video.iqiyi.com").is_empty());
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("SRT".parse::<SubtitleFormat>(), Ok(SubtitleFormat::Srt));
        assert_eq!("vtt".parse::<SubtitleFormat>(), Ok(SubtitleFormat::WebVtt));
        assert!("ass".parse::<SubtitleFormat>().is_err());
    }
}
