//! Page fetcher.
//!
//! Wraps a [`Transport`] with the shared backoff policy, the pool-wide
//! throttle, a per-request timeout and cooperative cancellation:
//!
//! - 2xx: returned
//! - 5xx, timeout, transport failure: retried with backoff up to the budget
//! - 429: pool paused once for the fixed delay, then retried once
//! - other 4xx: returned immediately as [`ResolveError::HttpStatus`]
//!
//! Cancellation drops the in-flight request future, which aborts the
//! underlying connection rather than leaving it running in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{ResolveError, Result};
use crate::fingerprint::api_headers;
use crate::retry::{BackoffPolicy, Throttle};
use crate::transport::{HttpRequest, HttpResponse, Transport};

#[derive(Clone)]
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    throttle: Arc<Throttle>,
    policy: BackoffPolicy,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        throttle: Arc<Throttle>,
        policy: BackoffPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            throttle,
            policy,
            timeout,
        }
    }

    /// GET a page and return its body.
    pub async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let response = self.fetch(HttpRequest::get(url), cancel).await?;
        Ok(response.body)
    }

    /// GET an API URL with XHR-style headers on behalf of `referer`.
    pub async fn fetch_api(
        &self,
        url: &str,
        referer: &str,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let request = HttpRequest::get(url).with_headers(api_headers(referer));
        self.fetch(request, cancel).await
    }

    /// Lightweight existence check. One attempt, no retries.
    ///
    /// Servers that refuse HEAD (405/501) are re-probed with GET.
    #[instrument(skip(self, cancel))]
    pub async fn probe(&self, url: &str, cancel: &CancellationToken) -> Result<bool> {
        let head = self.send_once(HttpRequest::head(url), cancel).await?;
        if head.status == 405 || head.status == 501 {
            let get = self.send_once(HttpRequest::get(url), cancel).await?;
            return Ok(get.is_success());
        }
        Ok(head.is_success())
    }

    /// Execute with retries, throttling and cancellation.
    #[instrument(skip(self, request, cancel), fields(url = %request.url))]
    pub async fn fetch(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut attempt: u32 = 0;
        let mut rate_limit_retried = false;

        loop {
            attempt += 1;
            let outcome = self.send_once(request.clone(), cancel).await;

            let err = match outcome {
                Ok(response) if response.is_success() => {
                    self.throttle.note_success();
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => {
                    if rate_limit_retried {
                        return Err(ResolveError::RateLimited { url: request.url });
                    }
                    rate_limit_retried = true;
                    warn!(pause = ?self.throttle.pause(), "Rate limited, pausing pool before one retry");
                    self.throttle.trip();
                    // The rate-limit retry does not spend the transient budget.
                    attempt -= 1;
                    continue;
                }
                Ok(response) => ResolveError::HttpStatus {
                    status: response.status,
                    url: request.url.clone(),
                },
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            self.throttle.note_transient();
            if attempt >= self.policy.max_attempts() {
                warn!(attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            debug!(attempt, ?delay, error = %err, "Transient failure, backing off");
            tokio::select! {
                () = cancel.cancelled() => return Err(ResolveError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn send_once(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        tokio::select! {
            () = cancel.cancelled() => return Err(ResolveError::Cancelled),
            () = self.throttle.wait() => {}
        }

        let url = request.url.clone();
        tokio::select! {
            () = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.transport.execute(request)) => {
                result.unwrap_or(Err(ResolveError::Timeout { url }))
            }
        }
    }
}
