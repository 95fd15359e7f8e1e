//! Live-TV channel scraper
//!
//! Discovers channel pages on an index page and resolves each one to a
//! playable M3U/M3U8 stream URL:
//!
//!   channel page → pattern catalogue → iframes (breadth-first) → headless Chrome
//!
//! Network access goes through `PageFetcher`; extraction itself is pure and
//! lives in `extractor`.

pub mod discovery;
pub mod extractor;
pub mod fetcher;

use anyhow::Result;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};
use url::Url;

pub use discovery::{discover_channel_links, DEFAULT_PATH_MARKERS};
pub use extractor::StreamExtractor;
pub use fetcher::{looks_like_challenge_page, BlockedPage, FetchedPage, FetcherConfig, PageFetcher};

/// Resolves an href found on `base` to an absolute http(s) URL without fragment.
pub fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "about:", "data:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = if href.starts_with("//") {
        Url::parse(&format!("https:{}", href)).ok()?
    } else {
        base.join(href).ok()?
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Found directly in the channel page.
    Pattern,
    /// Found inside an iframe, `depth` levels below the channel page.
    Iframe { depth: usize },
    /// Found in the DOM rendered by headless Chrome.
    Browser,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMethod::Pattern => write!(f, "pattern"),
            ExtractionMethod::Iframe { depth } => write!(f, "iframe:{}", depth),
            ExtractionMethod::Browser => write!(f, "browser"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub stream_url: String,
    pub method: ExtractionMethod,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub iframe_depth: usize,
    pub max_iframes_per_page: usize,
    /// Render the channel page in the browser when nothing else matched.
    pub browser_extraction: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            iframe_depth: 2,
            max_iframes_per_page: 3,
            browser_extraction: false,
        }
    }
}

pub struct ChannelResolver {
    fetcher: PageFetcher,
    extractor: StreamExtractor,
    config: ResolverConfig,
    last_html: Option<String>,
}

impl ChannelResolver {
    pub fn new(fetcher: PageFetcher, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            extractor: StreamExtractor::new(),
            config,
            last_html: None,
        }
    }

    pub fn fetcher_mut(&mut self) -> &mut PageFetcher {
        &mut self.fetcher
    }

    /// Body of the most recently fetched channel page.
    pub fn last_html(&self) -> Option<&str> {
        self.last_html.as_deref()
    }

    /// Resolves one channel page to a stream URL. Only a failure to fetch the
    /// channel page itself is an error; everything after that degrades to `None`.
    pub async fn resolve(&mut self, channel_url: &Url) -> Result<Option<Resolution>> {
        self.last_html = None;
        let page = self.fetcher.fetch(channel_url.as_str(), None).await?;
        let page_url = Url::parse(&page.url).unwrap_or_else(|_| channel_url.clone());

        if let Some(stream_url) = self.extractor.find_stream_url(&page.body, &page_url) {
            let method = if page.via_browser {
                ExtractionMethod::Browser
            } else {
                ExtractionMethod::Pattern
            };
            self.last_html = Some(page.body);
            return Ok(Some(Resolution { stream_url, method }));
        }

        if let Some(resolution) = self.resolve_iframes(&page.body, &page_url).await {
            self.last_html = Some(page.body);
            return Ok(Some(resolution));
        }

        let via_browser = page.via_browser;
        self.last_html = Some(page.body);

        if self.config.browser_extraction && !via_browser {
            info!("No stream in static HTML of {}, rendering in browser", channel_url);
            match self.fetcher.render(channel_url.as_str()).await {
                Ok(rendered) => {
                    if let Some(stream_url) = self.extractor.find_stream_url(&rendered.body, &page_url) {
                        self.last_html = Some(rendered.body);
                        return Ok(Some(Resolution {
                            stream_url,
                            method: ExtractionMethod::Browser,
                        }));
                    }
                    self.last_html = Some(rendered.body);
                }
                Err(e) => warn!("Browser render of {} failed: {}", channel_url, e),
            }
        }

        Ok(None)
    }

    async fn resolve_iframes(&mut self, html: &str, page_url: &Url) -> Option<Resolution> {
        let max = self.config.max_iframes_per_page;
        let mut visited: HashSet<String> = HashSet::from([page_url.to_string()]);
        let mut frontier: Vec<(Url, Url)> = self
            .extractor
            .iframe_sources(html, page_url)
            .into_iter()
            .take(max)
            .map(|frame| (frame, page_url.clone()))
            .collect();

        for depth in 1..=self.config.iframe_depth {
            if frontier.is_empty() {
                break;
            }

            let mut next = Vec::new();
            for (frame_url, parent) in frontier {
                if !visited.insert(frame_url.to_string()) {
                    continue;
                }

                let frame = match self.fetcher.fetch(frame_url.as_str(), Some(parent.as_str())).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("iframe {} failed: {}", frame_url, e);
                        continue;
                    }
                };
                let frame_page_url = Url::parse(&frame.url).unwrap_or_else(|_| frame_url.clone());
                debug!("Scanning iframe {} (depth {})", frame_page_url, depth);

                if let Some(stream_url) = self.extractor.find_stream_url(&frame.body, &frame_page_url) {
                    return Some(Resolution {
                        stream_url,
                        method: ExtractionMethod::Iframe { depth },
                    });
                }

                if depth < self.config.iframe_depth {
                    next.extend(
                        self.extractor
                            .iframe_sources(&frame.body, &frame_page_url)
                            .into_iter()
                            .take(max)
                            .map(|child| (child, frame_page_url.clone())),
                    );
                }
            }
            frontier = next;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_fixture::{page, serve, Router};
    use std::time::Duration;

    fn resolver(config: ResolverConfig) -> ChannelResolver {
        let fetcher = PageFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(5),
            min_request_interval: Duration::ZERO,
            ..FetcherConfig::default()
        });
        ChannelResolver::new(fetcher, config)
    }

    #[test]
    fn resolve_href_handles_relative_and_protocol_relative() {
        let base = Url::parse("https://www.canlitv.me/hd1").unwrap();
        assert_eq!(
            resolve_href("izle/trt", &base).unwrap().as_str(),
            "https://www.canlitv.me/izle/trt"
        );
        assert_eq!(
            resolve_href("//cdn.example.com/x", &base).unwrap().as_str(),
            "https://cdn.example.com/x"
        );
        assert!(resolve_href("mailto:info@canlitv.me", &base).is_none());
        assert!(resolve_href("ftp://files.example.com/a", &base).is_none());
        assert!(resolve_href("#top", &base).is_none());
    }

    #[test]
    fn extraction_method_labels() {
        assert_eq!(ExtractionMethod::Pattern.to_string(), "pattern");
        assert_eq!(ExtractionMethod::Iframe { depth: 2 }.to_string(), "iframe:2");
        assert_eq!(ExtractionMethod::Browser.to_string(), "browser");
    }

    #[tokio::test]
    async fn resolves_stream_in_channel_page() {
        let (base, _) = serve(Router::new().route(
            "/izle/trt-1",
            page(200, r#"<script>var p = { source: "/hls/trt1.m3u8" };</script>"#),
        ))
        .await;
        let url = Url::parse(&format!("{base}/izle/trt-1")).unwrap();

        let resolution = resolver(ResolverConfig::default()).resolve(&url).await.unwrap().unwrap();
        assert_eq!(resolution.stream_url, format!("{base}/hls/trt1.m3u8"));
        assert_eq!(resolution.method, ExtractionMethod::Pattern);
    }

    #[tokio::test]
    async fn follows_nested_iframes_with_parent_as_referer() {
        let (base, requests) = serve(
            Router::new()
                .route("/izle/atv", page(200, r#"<iframe src="/embed/atv"></iframe>"#))
                .route("/embed/atv", page(200, r#"<iframe src="/player/atv"></iframe>"#))
                .route(
                    "/player/atv",
                    page(200, r#"<script>jwplayer().setup({ file: "playlist.m3u8" })</script>"#),
                ),
        )
        .await;
        let url = Url::parse(&format!("{base}/izle/atv")).unwrap();

        let mut resolver = resolver(ResolverConfig::default());
        let resolution = resolver.resolve(&url).await.unwrap().unwrap();
        assert_eq!(resolution.stream_url, format!("{base}/player/playlist.m3u8"));
        assert_eq!(resolution.method, ExtractionMethod::Iframe { depth: 2 });
        assert!(resolver.last_html().unwrap().contains("/embed/atv"));

        assert_eq!(requests.referer_of("/izle/atv"), None);
        assert_eq!(requests.referer_of("/embed/atv"), Some(format!("{base}/izle/atv")));
        assert_eq!(requests.referer_of("/player/atv"), Some(format!("{base}/embed/atv")));
    }

    #[tokio::test]
    async fn iframe_depth_limit_is_respected() {
        let (base, requests) = serve(
            Router::new()
                .route("/izle/atv", page(200, r#"<iframe src="/embed/atv"></iframe>"#))
                .route("/embed/atv", page(200, r#"<iframe src="/player/atv"></iframe>"#))
                .route("/player/atv", page(200, r#"<video src="/live.m3u8"></video>"#)),
        )
        .await;
        let url = Url::parse(&format!("{base}/izle/atv")).unwrap();

        let config = ResolverConfig {
            iframe_depth: 1,
            ..ResolverConfig::default()
        };
        assert!(resolver(config).resolve(&url).await.unwrap().is_none());
        assert_eq!(requests.hits("/player/atv"), 0);
    }

    #[tokio::test]
    async fn iframes_per_page_are_capped() {
        let (base, requests) = serve(
            Router::new()
                .route(
                    "/izle/show",
                    page(200, r#"<iframe src="/ads/banner"></iframe><iframe src="/embed/show"></iframe>"#),
                )
                .route("/ads/banner", page(200, "<html>reklam</html>"))
                .route("/embed/show", page(200, r#"<source src="/show.m3u8">"#)),
        )
        .await;
        let url = Url::parse(&format!("{base}/izle/show")).unwrap();

        let capped = ResolverConfig {
            max_iframes_per_page: 1,
            ..ResolverConfig::default()
        };
        assert!(resolver(capped).resolve(&url).await.unwrap().is_none());
        assert_eq!(requests.hits("/embed/show"), 0);

        let resolution = resolver(ResolverConfig::default()).resolve(&url).await.unwrap().unwrap();
        assert_eq!(resolution.stream_url, format!("{base}/show.m3u8"));
    }

    #[tokio::test]
    async fn broken_iframe_is_skipped() {
        let (base, _) = serve(
            Router::new()
                .route(
                    "/izle/show",
                    page(200, r#"<iframe src="/missing"></iframe><iframe src="/embed/show"></iframe>"#),
                )
                .route("/embed/show", page(200, r#"<source src="https://cdn.example.com/show.m3u8">"#)),
        )
        .await;
        let url = Url::parse(&format!("{base}/izle/show")).unwrap();

        let resolution = resolver(ResolverConfig::default()).resolve(&url).await.unwrap().unwrap();
        assert_eq!(resolution.stream_url, "https://cdn.example.com/show.m3u8");
        assert_eq!(resolution.method, ExtractionMethod::Iframe { depth: 1 });
    }

    #[tokio::test]
    async fn self_referencing_iframe_terminates() {
        let (base, requests) =
            serve(Router::new().route("/izle/loop", page(200, r#"<iframe src="/izle/loop"></iframe>"#))).await;
        let url = Url::parse(&format!("{base}/izle/loop")).unwrap();

        assert!(resolver(ResolverConfig::default()).resolve(&url).await.unwrap().is_none());
        assert_eq!(requests.hits("/izle/loop"), 1);
    }

    #[tokio::test]
    async fn unreachable_channel_page_is_an_error() {
        let (base, _) = serve(Router::new()).await;
        let url = Url::parse(&format!("{base}/izle/none")).unwrap();

        assert!(resolver(ResolverConfig::default()).resolve(&url).await.is_err());
    }
}
