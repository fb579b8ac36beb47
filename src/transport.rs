//! HTTP transport seam.
//!
//! [`Transport`] performs exactly one request and reports the raw status and
//! body. Retries, throttling and cancellation live one level up in
//! [`PageFetcher`](crate::http_client::PageFetcher), so a transport never
//! decides whether a status is an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::fingerprint::BrowserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Overrides applied on top of the transport's default headers.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One-shot HTTP execution.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by a pooled `reqwest` client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(profile: &BrowserProfile, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            .default_headers(profile.to_headers())
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(url = %request.url, method = ?request.method))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        debug!(status, version = ?response.version(), "Response received");

        let body = if request.method == Method::Head {
            String::new()
        } else {
            response.text().await?
        };

        Ok(HttpResponse { status, url, body })
    }
}

/// Scripted transport for tests.
///
/// Routes are matched by exact URL (query included) first, then by URL
/// without query. Each route holds a queue of responses; the last one
/// repeats once the queue is drained. A concurrency gauge records the
/// highest number of requests in flight at once.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{HttpRequest, HttpResponse, Method, Transport};
    use crate::error::{ResolveError, Result};

    #[derive(Clone)]
    pub enum Reply {
        Status(u16, String),
        Fail(ResolveError),
        Hang,
    }

    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<String, Vec<Reply>>>,
        log: Mutex<Vec<(Method, String)>>,
        latency: Mutex<Option<Duration>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_latency(self, latency: Duration) -> Self {
            *self.latency.lock().unwrap() = Some(latency);
            self
        }

        pub fn route(&self, url: &str, reply: Reply) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push(reply);
            self
        }

        pub fn ok(&self, url: &str, body: impl Into<String>) -> &Self {
            self.route(url, Reply::Status(200, body.into()))
        }

        pub fn status(&self, url: &str, status: u16) -> &Self {
            self.route(url, Reply::Status(status, String::new()))
        }

        /// Number of requests made to `url` (exact match, query included).
        pub fn hits(&self, url: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, u)| u == url)
                .count()
        }

        pub fn requests(&self) -> Vec<(Method, String)> {
            self.log.lock().unwrap().clone()
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn next_reply(&self, url: &str) -> Option<Reply> {
            let mut routes = self.routes.lock().unwrap();
            let key = if routes.contains_key(url) {
                url.to_string()
            } else {
                url.split('?').next().unwrap_or(url).to_string()
            };
            let queue = routes.get_mut(&key)?;
            if queue.len() > 1 {
                Some(queue.remove(0))
            } else {
                queue.first().cloned()
            }
        }
    }

    struct Gauge<'a>(&'a AtomicUsize);

    impl Drop for Gauge<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.log
                .lock()
                .unwrap()
                .push((request.method, request.url.clone()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _gauge = Gauge(&self.in_flight);

            let latency = *self.latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            match self.next_reply(&request.url) {
                Some(Reply::Status(status, body)) => Ok(HttpResponse {
                    status,
                    url: request.url,
                    body: if request.method == Method::Head {
                        String::new()
                    } else {
                        body
                    },
                }),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Hang) => std::future::pending::<Result<HttpResponse>>().await,
                None => Ok(HttpResponse {
                    status: 404,
                    url: request.url,
                    body: String::new(),
                }),
            }
        }
    }
}
