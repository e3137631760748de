//! HTTP client seam
//!
//! Virtual users talk to the system under test through [`RequestClient`], so
//! tests can record requests instead of sending them. [`HttpClient`] is the
//! `reqwest` implementation used by the binary.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use tracing::trace;

use crate::error::{LoadTestError, Result};

/// Outcome of one request, as seen by the statistics layer.
///
/// Transport failures are data, not errors: `status` is `None` and `error`
/// says what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: Option<u16>,
    pub latency_us: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub error: Option<String>,
}

impl RequestOutcome {
    /// A response arrived with `status`
    pub fn response(status: u16, latency_us: u64, bytes_sent: u64, bytes_received: u64) -> Self {
        Self {
            status: Some(status),
            latency_us,
            bytes_sent,
            bytes_received,
            error: None,
        }
    }

    /// No response arrived
    pub fn transport_error(kind: impl Into<String>, latency_us: u64, bytes_sent: u64) -> Self {
        Self {
            status: None,
            latency_us,
            bytes_sent,
            bytes_received: 0,
            error: Some(kind.into()),
        }
    }

    /// 2xx and 3xx count as success, everything else as failure
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(code) if (200..400).contains(&code))
    }

    /// The limiter rejected the request
    pub fn is_throttled(&self) -> bool {
        self.status == Some(429)
    }

    /// Short failure label for error counts; `None` on success
    pub fn failure_kind(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        match (self.status, &self.error) {
            (Some(code), _) => Some(format!("http_{}", code)),
            (None, Some(kind)) => Some(kind.clone()),
            (None, None) => Some("unknown".to_string()),
        }
    }
}

/// Minimal request interface a virtual user needs
#[async_trait]
pub trait RequestClient: Send + Sync {
    /// Issue one request against `path`, relative to the target base URL
    async fn request(&self, method: Method, path: &str, headers: &[(&str, &str)])
        -> RequestOutcome;
}

/// `reqwest`-backed client bound to one target
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration, max_idle_per_host: usize) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .user_agent(concat!("rl-loadtest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoadTestError::ClientBuild(e.to_string()))?;

        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(err: &reqwest::Error) -> &'static str {
        if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else if err.is_body() || err.is_decode() {
            "body"
        } else {
            "request"
        }
    }
}

#[async_trait]
impl RequestClient for HttpClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> RequestOutcome {
        let start = Instant::now();
        let url = format!("{}{}", self.base_url, path);
        let bytes_sent = (url.len()
            + headers.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>())
            as u64;

        let mut builder = self.inner.request(method, &url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // A body that fails mid-read still counts as the status received.
                let bytes = response.bytes().await.unwrap_or_default();
                trace!("{} -> {}", url, status);
                RequestOutcome::response(
                    status,
                    start.elapsed().as_micros() as u64,
                    bytes_sent,
                    bytes.len() as u64,
                )
            }
            Err(e) => {
                trace!("{} failed: {}", url, e);
                RequestOutcome::transport_error(
                    Self::classify(&e),
                    start.elapsed().as_micros() as u64,
                    bytes_sent,
                )
            }
        }
    }
}

/// One request captured by [`DryRunClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type StatusFn = dyn Fn(usize) -> Option<u16> + Send + Sync;

/// Client that records requests instead of sending them.
///
/// Each request is answered by a status function given the request's
/// sequence number; `None` simulates a transport failure.
pub struct DryRunClient {
    requests: parking_lot::Mutex<Vec<RecordedRequest>>,
    status_fn: Box<StatusFn>,
}

impl DryRunClient {
    /// Answer every request with 200
    pub fn new() -> Self {
        Self::with_status_fn(|_| Some(200))
    }

    pub fn with_status_fn<F>(status_fn: F) -> Self
    where
        F: Fn(usize) -> Option<u16> + Send + Sync + 'static,
    {
        Self {
            requests: parking_lot::Mutex::new(Vec::new()),
            status_fn: Box::new(status_fn),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for DryRunClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestClient for DryRunClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
    ) -> RequestOutcome {
        let bytes_sent = (path.len()
            + headers.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>())
            as u64;

        let seq = {
            let mut requests = self.requests.lock();
            requests.push(RecordedRequest {
                method,
                path: path.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
            requests.len() - 1
        };

        match (self.status_fn)(seq) {
            Some(status) => RequestOutcome::response(status, 1, bytes_sent, 0),
            None => RequestOutcome::transport_error("dry_run", 1, bytes_sent),
        }
    }
}
