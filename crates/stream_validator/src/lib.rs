//! Stream URL validation by HTTP probing.
//!
//! A probe is a HEAD request, then a ranged GET when HEAD is refused. HLS
//! playlist URLs (`.m3u` in the path or query) go straight to the GET and
//! their body must look like a playlist. Transient failures (transport errors, timeouts, 429, 5xx) are
//! retried with a linear back-off.

use futures_util::stream::{self, StreamExt};
use reqwest::header::{RANGE, REFERER};
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub retry_delay: Duration,
    pub concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            retry_delay: Duration::from_secs(1),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub status: Option<u16>,
    pub response_time: Duration,
    pub error: Option<String>,
    pub attempts: u32,
}

/// One URL to check: caller's index, stream URL, optional referer.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub index: usize,
    pub url: String,
    pub referer: Option<String>,
}

#[derive(Debug)]
struct Probe {
    is_valid: bool,
    status: Option<u16>,
    error: Option<String>,
    transient: bool,
}

impl Probe {
    fn valid(status: u16) -> Self {
        Self { is_valid: true, status: Some(status), error: None, transient: false }
    }

    fn invalid(status: Option<u16>, error: impl Into<String>, transient: bool) -> Self {
        Self { is_valid: false, status, error: Some(error.into()), transient }
    }
}

#[derive(Clone)]
pub struct StreamValidator {
    client: reqwest::Client,
    config: ValidatorConfig,
}

impl StreamValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .user_agent(USER_AGENT)
                .pool_max_idle_per_host(8)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }

    /// Probes `url`, retrying transient failures.
    pub async fn validate(&self, url: &str, referer: Option<&str>) -> ValidationResult {
        let started = Instant::now();
        let max_attempts = self.config.retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let probe = self.probe_once(url, referer).await;

            if probe.is_valid || !probe.transient || attempts >= max_attempts {
                return ValidationResult {
                    is_valid: probe.is_valid,
                    status: probe.status,
                    response_time: started.elapsed(),
                    error: probe.error,
                    attempts,
                };
            }

            let delay = self.config.retry_delay * attempts;
            debug!(
                "{} attempt {}/{} failed ({}), retrying in {}ms",
                url,
                attempts,
                max_attempts,
                probe.error.as_deref().unwrap_or("unknown"),
                delay.as_millis()
            );
            sleep(delay).await;
        }
    }

    /// Validates all targets with bounded concurrency; results come back in
    /// `index` order.
    pub async fn validate_all(&self, targets: &[ProbeTarget]) -> Vec<(usize, ValidationResult)> {
        let total = targets.len();
        let concurrency = self.config.concurrency.max(1);

        let mut results: Vec<(usize, ValidationResult)> = stream::iter(targets.iter().enumerate())
            .map(|(n, target)| async move {
                let result = self.validate(&target.url, target.referer.as_deref()).await;
                if result.is_valid {
                    info!("   ✅ [{}/{}] {} ({}ms)", n + 1, total, target.url, result.response_time.as_millis());
                } else {
                    warn!(
                        "   ❌ [{}/{}] {} - {}",
                        n + 1,
                        total,
                        target.url,
                        result.error.as_deref().unwrap_or("Unknown error")
                    );
                }
                (target.index, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results
    }

    async fn probe_once(&self, url: &str, referer: Option<&str>) -> Probe {
        // Playlists always need their body checked, so HEAD only helps for media URLs.
        if !is_hls_url(url) {
            let mut head = self.client.head(url);
            if let Some(referer) = referer {
                head = head.header(REFERER, referer);
            }

            if let Ok(Ok(resp)) = timeout(self.config.timeout, head.send()).await {
                let status = resp.status();
                if status.is_success() {
                    return Probe::valid(status.as_u16());
                }
            }
        }

        let mut get = self.client.get(url).header(RANGE, "bytes=0-1024");
        if let Some(referer) = referer {
            get = get.header(REFERER, referer);
        }

        let resp = match timeout(self.config.timeout, get.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Probe::invalid(None, format!("Request failed: {}", e), true),
            Err(_) => return Probe::invalid(None, "Timeout", true),
        };

        let status = resp.status();
        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            let transient = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Probe::invalid(Some(status.as_u16()), format!("HTTP {}", status), transient);
        }

        if !is_hls_url(url) {
            return Probe::valid(status.as_u16());
        }

        match timeout(self.config.timeout, resp.text()).await {
            Ok(Ok(text)) if looks_like_playlist(&text) => Probe::valid(status.as_u16()),
            Ok(Ok(_)) => Probe::invalid(Some(status.as_u16()), "Invalid HLS playlist", false),
            Ok(Err(e)) => Probe::invalid(Some(status.as_u16()), format!("Body read failed: {}", e), true),
            Err(_) => Probe::invalid(Some(status.as_u16()), "Timeout", true),
        }
    }
}

/// `.m3u`/`.m3u8` anywhere in the path or query, so gateway URLs such as
/// `get.php?file=kanal.m3u8` also get their body checked. The fragment is ignored.
pub fn is_hls_url(url: &str) -> bool {
    let url = url.split('#').next().unwrap_or(url).to_ascii_lowercase();
    url.contains(".m3u")
}

pub fn looks_like_playlist(body: &str) -> bool {
    body.contains("#EXTM3U") || body.contains("#EXTINF")
}
