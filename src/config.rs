//! Resolver configuration.
//!
//! A flat set of knobs with explicit defaults. The CLI may load it from
//! `~/.config/iqresolve/config.toml`; the pipeline itself only ever sees the
//! struct it is handed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ResolveError;
use crate::subtitle::SubtitleFormat;

/// Manifest endpoint the signed query is appended to.
pub const DEFAULT_MANIFEST_ENDPOINT: &str = "https://cache.video.iqiyi.com/dash";

/// Host used for path-relative subtitle fragments when the response carries no `dm` base.
pub const DEFAULT_SUBTITLE_BASE: &str = "http://meta.video.iqiyi.com";

const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Page to resolve when none is given on the command line.
    pub target_url: Option<String>,
    /// Upper bound on episode-list entries processed from one page.
    pub max_episodes: usize,
    /// Concurrent resolution jobs in the worker pool.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Wall-clock budget for one episode job, all strategies included.
    pub job_timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Pool-wide pause after an HTTP 429.
    pub rate_limit_delay_ms: u64,
    /// Consecutive transient failures before the whole pool is paused.
    pub throttle_after: u32,
    /// Re-fetch the page once for a fresh signature when the endpoint reports expiry.
    pub refresh_on_expiry: bool,
    pub manifest_endpoint: String,
    pub subtitle_base: String,
    pub subtitle_formats: Vec<SubtitleFormat>,
    /// Allow the URL-pattern strategy to probe generated sibling URLs.
    pub probe_patterns: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            max_episodes: 100,
            concurrency: 5,
            request_timeout_secs: 15,
            job_timeout_secs: 180,
            max_retries: 3,
            backoff_base_ms: 1000,
            rate_limit_delay_ms: 5000,
            throttle_after: 5,
            refresh_on_expiry: true,
            manifest_endpoint: DEFAULT_MANIFEST_ENDPOINT.to_string(),
            subtitle_base: DEFAULT_SUBTITLE_BASE.to_string(),
            subtitle_formats: vec![
                SubtitleFormat::Srt,
                SubtitleFormat::WebVtt,
                SubtitleFormat::Xml,
            ],
            probe_patterns: true,
        }
    }
}

impl ResolverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    /// Worker count clamped to a sane range.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: &str| Err(ResolveError::Config(msg.to_string()));
        if self.max_episodes == 0 {
            return invalid("max_episodes must be at least 1");
        }
        if self.subtitle_formats.is_empty() {
            return invalid("subtitle_formats must name at least one format");
        }
        if self.request_timeout_secs == 0 || self.job_timeout_secs == 0 {
            return invalid("timeouts must be non-zero");
        }
        for (name, value) in [
            ("manifest_endpoint", &self.manifest_endpoint),
            ("subtitle_base", &self.subtitle_base),
        ] {
            if !matches!(url::Url::parse(value), Ok(u) if matches!(u.scheme(), "http" | "https")) {
                return Err(ResolveError::Config(format!("{name} is not an http(s) URL: {value}")));
            }
        }
        Ok(())
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid resolver config")?;
        Ok(config)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    /// Load from the default location, falling back to defaults when the file is absent.
    pub fn load_default() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("iqresolve")
        .join("config.toml")
}
