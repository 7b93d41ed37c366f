//! HTTP Transport: spec.md §4.1.
//!
//! A thin `reqwest`-backed client exposing exactly the four operations the
//! rest of the core needs: `head`, `get`, `get_range`, `probe`. One shared
//! token-bucket rate limiter gates every call; transport errors and 5xx
//! responses are retried with exponential backoff up to a bounded attempt
//! count, while 4xx (except 429) is terminal. Built on `reqwest` over
//! rustls, matching the teacher's choice for portable builds without
//! OpenSSL.

mod rate_limiter;
mod user_agent;

pub use rate_limiter::RateLimiter;
pub use user_agent::{pick as pick_user_agent, BROWSER_USER_AGENTS, DEFAULT_USER_AGENT};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::{Config, HttpConfig};
use crate::error::{AnacsyncError, Result};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ProbeInfo {
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub accept_ranges: Option<bool>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub bytes: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// `false` when the server ignored the Range header and returned 200
    /// with the full body (spec.md §4.1: "the transport ... signals
    /// non-partial so the caller can disable resume logic").
    pub partial: bool,
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    rate_limiter: RateLimiter,
    ua_counter: Arc<AtomicUsize>,
    user_agent_pool: Vec<&'static str>,
}

impl Transport {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_http_config(&config.http, config.downloader.rate_limit_rps)
    }

    pub fn with_http_config(http: &HttpConfig, rate_limit_rps: f64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(http.connect_timeout())
            .timeout(http.read_timeout())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| AnacsyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::new(rate_limit_rps),
            ua_counter: Arc::new(AtomicUsize::new(0)),
            user_agent_pool: BROWSER_USER_AGENTS.to_vec(),
        })
    }

    fn next_user_agent(&self) -> &'static str {
        let n = self.ua_counter.fetch_add(1, Ordering::Relaxed);
        pick_user_agent(&self.user_agent_pool, n)
    }

    async fn throttled<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.rate_limiter.acquire().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Terminal(status, message)) => {
                    return Err(AnacsyncError::TerminalNetwork { status, message });
                }
                Err(AttemptError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(AnacsyncError::TransientNetwork(message));
                    }
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt - 1));
                    warn!("transient HTTP error ({}), retrying in {:?}: {}", attempt, backoff, message);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// `HEAD url`, returning the headers map or an error.
    pub async fn head(&self, url: &str) -> Result<HashMap<String, String>> {
        let ua = self.next_user_agent();
        self.throttled(|| async {
            let resp = self
                .client
                .head(url)
                .header("User-Agent", ua)
                .send()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            classify_status(resp.status())?;
            Ok(headers_to_map(resp.headers()))
        })
        .await
    }

    /// `GET url`, returning the full body and headers.
    pub async fn get(&self, url: &str) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let ua = self.next_user_agent();
        self.throttled(|| async {
            let resp = self
                .client
                .get(url)
                .header("User-Agent", ua)
                .send()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            classify_status(resp.status())?;
            let headers = headers_to_map(resp.headers());
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            Ok((bytes.to_vec(), headers))
        })
        .await
    }

    /// `GET url` with a `Range: bytes=start-end` header. `end = None` means
    /// an open-ended range to the end of the resource.
    pub async fn get_range(&self, url: &str, start: u64, end: Option<u64>) -> Result<RangeResponse> {
        self.get_range_with_headers(url, start, end, &[]).await
    }

    /// As `get_range`, with extra request headers (used by S4 to send
    /// `Connection: close`).
    pub async fn get_range_with_headers(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
        extra_headers: &[(&str, &str)],
    ) -> Result<RangeResponse> {
        let range_value = match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        let ua = self.next_user_agent();
        self.throttled(|| async {
            let mut req = self
                .client
                .get(url)
                .header("User-Agent", ua)
                .header("Range", &range_value);
            for (name, value) in extra_headers {
                req = req.header(*name, *value);
            }
            let resp = req.send().await.map_err(|e| AttemptError::Transient(e.to_string()))?;
            let status = resp.status();
            if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
                classify_status(status)?;
            }
            let partial = status == StatusCode::PARTIAL_CONTENT;
            let headers = headers_to_map(resp.headers());
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            Ok(RangeResponse {
                bytes: bytes.to_vec(),
                headers,
                partial,
            })
        })
        .await
    }

    /// Probe a resource for size/etag/last-modified/accept-ranges,
    /// preferring HEAD; on error or missing headers, fall back to a
    /// bounded GET (a single-byte range request) and extract the same
    /// fields, per spec.md §4.1.
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo> {
        match self.head(url).await {
            Ok(headers) => {
                let info = probe_info_from_headers(&headers);
                if info.content_length.is_some() || info.etag.is_some() {
                    return Ok(info);
                }
                debug!("HEAD returned no usable headers for {url}, falling back to ranged GET");
            }
            Err(e) => {
                debug!("HEAD failed for {url} ({e}), falling back to ranged GET");
            }
        }

        let resp = self.get_range(url, 0, Some(0)).await?;
        let mut info = probe_info_from_headers(&resp.headers);
        if !resp.partial {
            // Server ignored the range and returned the whole body: we
            // cannot trust accept_ranges, but content-length is still the
            // true size in that case.
            info.accept_ranges = Some(false);
        }
        Ok(info)
    }
}

enum AttemptError {
    Transient(String),
    Terminal(u16, String),
}

fn classify_status(status: StatusCode) -> std::result::Result<(), AttemptError> {
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    if status.is_server_error() || code == 429 {
        Err(AttemptError::Transient(format!("HTTP {code}")))
    } else {
        Err(AttemptError::Terminal(code, format!("HTTP {code}")))
    }
}

fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }
    map
}

fn probe_info_from_headers(headers: &HashMap<String, String>) -> ProbeInfo {
    ProbeInfo {
        content_length: headers.get("content-length").and_then(|v| v.parse().ok()),
        etag: headers.get("etag").cloned(),
        last_modified: headers.get("last-modified").cloned(),
        accept_ranges: headers
            .get("accept-ranges")
            .map(|v| v.eq_ignore_ascii_case("bytes")),
        content_type: headers.get("content-type").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_treats_429_and_5xx_as_transient() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Err(AttemptError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(AttemptError::Transient(_))
        ));
    }

    #[test]
    fn classify_status_treats_other_4xx_as_terminal() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Err(AttemptError::Terminal(404, _))
        ));
    }

    #[test]
    fn probe_info_extracts_known_headers() {
        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "1024".to_string());
        headers.insert("etag".to_string(), "\"abc\"".to_string());
        headers.insert("accept-ranges".to_string(), "bytes".to_string());
        let info = probe_info_from_headers(&headers);
        assert_eq!(info.content_length, Some(1024));
        assert_eq!(info.etag.as_deref(), Some("\"abc\""));
        assert_eq!(info.accept_ranges, Some(true));
    }
}
