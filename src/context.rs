//! Shared resolver context.
//!
//! Built once per process and passed by reference (or cheap clone) into every
//! component. It owns the transport, the pool-wide throttle and the
//! configuration; there are no globals behind it.

use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::fingerprint::random_profile;
use crate::http_client::PageFetcher;
use crate::retry::{BackoffPolicy, Throttle};
use crate::transport::{ReqwestTransport, Transport};

#[derive(Clone)]
pub struct ResolverContext {
    config: Arc<ResolverConfig>,
    fetcher: PageFetcher,
}

impl ResolverContext {
    /// Context with a real HTTP transport and a randomly drawn browser profile.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&random_profile(), config.request_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Context over any transport; tests use this with a scripted double.
    pub fn with_transport(config: ResolverConfig, transport: Arc<dyn Transport>) -> Self {
        let throttle = Arc::new(Throttle::from_config(&config));
        let fetcher = PageFetcher::new(
            transport,
            throttle,
            BackoffPolicy::from_config(&config),
            config.request_timeout(),
        );
        Self {
            config: Arc::new(config),
            fetcher,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }
}
