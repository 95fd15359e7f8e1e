//! HTTP page fetcher with request pacing, user-agent rotation and a
//! headless Chrome fallback for pages that answer with an anti-bot wall.

use anyhow::{anyhow, bail, Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use headless_chrome::{Browser, LaunchOptions};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
];

/// Markers of Cloudflare interstitials and CAPTCHA widgets, matched lowercase.
const CHALLENGE_MARKERS: [&str; 7] = [
    "just a moment...",
    "cf-challenge",
    "challenge-platform",
    "cf-browser-verification",
    "g-recaptcha",
    "h-captcha",
    "hcaptcha.com",
];

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    /// Zero disables pacing.
    pub min_request_interval: Duration,
    pub browser_fallback: bool,
    pub chrome_path: Option<PathBuf>,
    pub min_browser_interval: Duration,
    /// Time the rendered page gets to run its scripts before the DOM is read.
    pub browser_settle: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_request_interval: Duration::from_millis(500),
            browser_fallback: false,
            chrome_path: None,
            min_browser_interval: Duration::from_secs(6),
            browser_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
    pub via_browser: bool,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The site answered with an anti-bot wall. Keeps the page so the caller can
/// dump it; recover it from an `anyhow::Error` with `downcast_ref`.
#[derive(Debug, Clone)]
pub struct BlockedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
    /// The wall was still there after a browser render.
    pub after_browser: bool,
}

impl fmt::Display for BlockedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.after_browser {
            write!(f, "{} still serves a challenge page after browser render, giving up", self.url)
        } else {
            write!(
                f,
                "{} is blocked (HTTP {}, challenge page: {}), giving up",
                self.url,
                self.status,
                looks_like_challenge_page(&self.body)
            )
        }
    }
}

impl std::error::Error for BlockedPage {}

pub struct PageFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    current_ua_index: usize,
    limiter: Option<DefaultDirectRateLimiter>,
    last_browser_fetch: Option<Instant>,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let limiter = Quota::with_period(config.min_request_interval).map(RateLimiter::direct);

        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(config.timeout)
                .gzip(true)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
            current_ua_index: 0,
            limiter,
            last_browser_fetch: None,
        }
    }

    /// Fetches `url`, switching to the browser when the site blocks plain HTTP.
    pub async fn fetch(&mut self, url: &str, referer: Option<&str>) -> Result<FetchedPage> {
        let page = self.fetch_http(url, referer).await?;
        let challenge = looks_like_challenge_page(&page.body);

        if !is_blocked_status(page.status) && !challenge {
            if !page.is_success() {
                bail!("HTTP {} for {}", page.status, url);
            }
            self.rotate_user_agent();
            return Ok(page);
        }

        if !self.config.browser_fallback {
            return Err(BlockedPage {
                url: url.to_string(),
                status: page.status,
                body: page.body,
                after_browser: false,
            }
            .into());
        }

        warn!("{} blocked (HTTP {}), trying browser fallback", url, page.status);
        let rendered = self.render(url).await?;
        if looks_like_challenge_page(&rendered.body) {
            return Err(BlockedPage {
                url: url.to_string(),
                status: rendered.status,
                body: rendered.body,
                after_browser: true,
            }
            .into());
        }

        self.rotate_user_agent();
        Ok(rendered)
    }

    /// Renders `url` in headless Chrome and returns the resulting DOM.
    pub async fn render(&mut self, url: &str) -> Result<FetchedPage> {
        if !self.config.browser_fallback {
            bail!("browser fallback is disabled");
        }

        if let Some(last) = self.last_browser_fetch {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_browser_interval {
                let wait = self.config.min_browser_interval - elapsed;
                debug!("Browser cooldown, waiting {}ms", wait.as_millis());
                sleep(wait).await;
            }
        }
        self.last_browser_fetch = Some(Instant::now());

        let target = url.to_string();
        let chrome_path = self.config.chrome_path.clone();
        let settle = self.config.browser_settle;

        let html = task::spawn_blocking(move || render_blocking(&target, chrome_path, settle))
            .await
            .map_err(|e| anyhow!("browser task failed: {e}"))??;

        Ok(FetchedPage {
            url: url.to_string(),
            status: 200,
            body: html,
            via_browser: true,
        })
    }

    async fn fetch_http(&mut self, url: &str, referer: Option<&str>) -> Result<FetchedPage> {
        self.wait_for_rate_limit().await;

        let mut request = self.client.get(url).header(USER_AGENT, self.current_user_agent());
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("request failed for {}", url))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(FetchedPage {
            url: final_url,
            status,
            body,
            via_browser: false,
        })
    }

    fn rotate_user_agent(&mut self) {
        self.current_ua_index = (self.current_ua_index + 1) % USER_AGENTS.len();
    }

    fn current_user_agent(&self) -> &'static str {
        USER_AGENTS[self.current_ua_index]
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

fn render_blocking(url: &str, chrome_path: Option<PathBuf>, settle: Duration) -> Result<String> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .path(chrome_path)
        .build()
        .context("Failed to build Chrome launch options")?;

    let browser = Browser::new(options).context("Failed to launch Chrome")?;
    let tab = browser.new_tab().context("Failed to create browser tab")?;

    tab.navigate_to(url).context("Chrome navigate failed")?;
    tab.wait_for_element("body").context("Chrome wait_for_element(body) failed")?;
    std::thread::sleep(settle);

    tab.get_content().context("Failed to read HTML from browser tab")
}

fn is_blocked_status(status: u16) -> bool {
    status == 403 || status == 503
}

pub fn looks_like_challenge_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_fixture::{page, serve, Router};

    fn quick_config() -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(5),
            min_request_interval: Duration::ZERO,
            ..FetcherConfig::default()
        }
    }

    #[test]
    fn detects_cloudflare_interstitial() {
        let html = "<html><head><title>Just a moment...</title></head><body><div id=\"cf-challenge-running\"></div></body></html>";
        assert!(looks_like_challenge_page(html));
    }

    #[test]
    fn detects_captcha_widget() {
        let html = r#"<form><div class="g-recaptcha" data-sitekey="x"></div></form>"#;
        assert!(looks_like_challenge_page(html));
    }

    #[test]
    fn cdn_reference_is_not_a_challenge() {
        let html = r#"<script src="https://cdnjs.cloudflare.com/ajax/libs/hls.js/1.4.0/hls.min.js"></script>"#;
        assert!(!looks_like_challenge_page(html));
    }

    #[test]
    fn zero_interval_disables_pacing() {
        let fetcher = PageFetcher::new(quick_config());
        assert!(fetcher.limiter.is_none());

        let paced = PageFetcher::new(FetcherConfig::default());
        assert!(paced.limiter.is_some());
    }

    #[tokio::test]
    async fn fetch_returns_body_and_rotates_user_agent() {
        let (base, _) = serve(Router::new().route("/hd1", page(200, "<html><body>kanallar</body></html>"))).await;
        let mut fetcher = PageFetcher::new(quick_config());

        let page = fetcher.fetch(&format!("{base}/hd1"), None).await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("kanallar"));
        assert!(!page.via_browser);
        assert_eq!(fetcher.current_ua_index, 1);
    }

    #[tokio::test]
    async fn fetch_sends_referer() {
        let (base, requests) = serve(Router::new().route("/embed/atv", page(200, "<html></html>"))).await;
        let mut fetcher = PageFetcher::new(quick_config());

        fetcher
            .fetch(&format!("{base}/embed/atv"), Some("https://www.canlitv.me/izle/atv"))
            .await
            .unwrap();
        assert_eq!(
            requests.referer_of("/embed/atv").as_deref(),
            Some("https://www.canlitv.me/izle/atv")
        );
    }

    #[tokio::test]
    async fn not_found_is_an_error() {
        let (base, _) = serve(Router::new()).await;
        let mut fetcher = PageFetcher::new(quick_config());

        let err = fetcher.fetch(&format!("{base}/missing"), None).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
        assert!(err.downcast_ref::<BlockedPage>().is_none());
    }

    #[tokio::test]
    async fn blocked_page_without_browser_gives_up_and_keeps_the_body() {
        let (base, _) = serve(Router::new().route("/izle/trt-1", page(403, "<title>Just a moment...</title>"))).await;
        let mut fetcher = PageFetcher::new(quick_config());

        let err = fetcher.fetch(&format!("{base}/izle/trt-1"), None).await.unwrap_err();
        assert!(err.to_string().contains("giving up"));

        let blocked = err.downcast_ref::<BlockedPage>().unwrap();
        assert_eq!(blocked.status, 403);
        assert!(blocked.body.contains("Just a moment..."));
        assert!(!blocked.after_browser);
    }

    #[tokio::test]
    async fn challenge_body_with_ok_status_is_blocked() {
        let (base, _) = serve(Router::new().route("/hd1", page(200, "<div class=\"h-captcha\"></div>"))).await;
        let mut fetcher = PageFetcher::new(quick_config());

        let err = fetcher.fetch(&format!("{base}/hd1"), None).await.unwrap_err();
        assert_eq!(err.downcast_ref::<BlockedPage>().unwrap().status, 200);
    }

    #[tokio::test]
    async fn render_requires_browser_fallback() {
        let mut fetcher = PageFetcher::new(quick_config());
        let err = fetcher.render("https://example.com/").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
