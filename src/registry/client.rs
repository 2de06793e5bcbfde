use crate::{Result, constants::*};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Typed failure of a single probe request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Got HTTP 404 response when fetching {0}")]
    NotFound(String),

    #[error("Got HTTP {status} response when fetching {url}")]
    InvalidResponse { url: String, status: u16 },

    #[error("Timed out fetching {0}")]
    Timeout(String),

    #[error("Failed to fetch {url}: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    /// A 404 is an answer and a timeout already spent the whole budget,
    /// neither is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::InvalidResponse { .. } | FetchError::Transport { .. })
    }
}

/// Minimal GET abstraction the probe layer runs on
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<Bytes, FetchError>;
}

/// reqwest-backed transport with connection pooling
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .connect_timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    fn classify(url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(url.to_string())
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(url, e))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(url.to_string())),
            status => {
                return Err(FetchError::InvalidResponse {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
        }

        response.bytes().await.map_err(|e| Self::classify(url, e))
    }
}

/// Knobs for a single `fetch`
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub retry: bool,
    pub max_attempts: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
            retry: false,
            max_attempts: FETCH_ATTEMPTS,
        }
    }
}

/// Outcome of one URL in a concurrent batch
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub body: Option<Bytes>,
    pub elapsed: Duration,
}

/// Bounded-timeout, optionally retried HTTP probes over a pluggable transport
#[derive(Clone)]
pub struct ProbeClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ProbeClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: HTTP_TIMEOUT,
        }
    }

    /// Probe client on top of a fresh [`HttpTransport`]
    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch a URL with the client's timeout, optionally retrying
    pub async fn fetch_url(&self, url: &str, retry: bool) -> std::result::Result<Bytes, FetchError> {
        self.fetch(
            url,
            FetchOptions {
                timeout: self.timeout,
                retry,
                ..FetchOptions::default()
            },
        )
        .await
    }

    /// Fetch a URL, retrying retryable failures up to `max_attempts` in total
    /// when `retry` is set. The last error propagates.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> std::result::Result<Bytes, FetchError> {
        let max_attempts = options.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1;
        debug!("Fetching {} ..", url);

        loop {
            let outcome = match tokio::time::timeout(options.timeout, self.transport.get(url, options.timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout(url.to_string())),
            };

            match outcome {
                Ok(body) => {
                    debug!("Took {:.2}s to fetch {}", started.elapsed().as_secs_f64(), url);
                    return Ok(body);
                }
                Err(e) if options.retry && e.is_retryable() && attempt < max_attempts => {
                    warn!("Failed to fetch {}, retrying ({}/{}, error was: {})", url, attempt, max_attempts, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Probe every URL once on a pool of `concurrency` workers.
    ///
    /// Every input URL yields exactly one [`ProbeResult`], in input order.
    /// Failures degrade to `body: None`; a hanging URL only occupies its own
    /// worker until the per-request timeout fires.
    pub async fn fetch_concurrent<I>(&self, urls: I, concurrency: usize) -> Vec<ProbeResult>
    where
        I: IntoIterator<Item = String>,
    {
        let urls: Vec<String> = urls.into_iter().collect();
        if urls.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        let tasks: Vec<_> = urls
            .iter()
            .cloned()
            .map(|url| {
                let sem = Arc::clone(&semaphore);
                let client = self.clone();

                tokio::spawn(async move {
                    // The semaphore is never closed, a failed acquire only
                    // means we run unthrottled.
                    let _permit = sem.acquire_owned().await.ok();
                    let started = Instant::now();
                    let body = match client.fetch_url(&url, false).await {
                        Ok(body) => {
                            let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
                            debug!("Downloaded {} at {:.0} bytes per second", url, body.len() as f64 / elapsed);
                            Some(body)
                        }
                        Err(e) => {
                            debug!("Failed to fetch {}! ({})", url, e);
                            None
                        }
                    };
                    ProbeResult {
                        url,
                        body,
                        elapsed: started.elapsed(),
                    }
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        results
            .into_iter()
            .zip(urls)
            .map(|(result, url)| {
                result.unwrap_or_else(|e| {
                    warn!("Probe worker for {} died: {}", url, e);
                    ProbeResult {
                        url,
                        body: None,
                        elapsed: Duration::ZERO,
                    }
                })
            })
            .collect()
    }
}
