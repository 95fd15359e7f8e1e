//! Diagnostic binary: probes the index page (and any extra URLs) without
//! writing a playlist.
//! Run: cargo run --bin site-probe -- [url ...]

use anyhow::{Context, Result};
use canlitv_playlist::ScraperConfig;
use channel_scraper::{discover_channel_links, looks_like_challenge_page, PageFetcher, StreamExtractor};
use dotenv::dotenv;
use playlist::channel_name_from_url;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let config = ScraperConfig::from_env().context("invalid configuration")?;
    let mut fetcher = PageFetcher::new(config.fetcher_config());
    let extractor = StreamExtractor::new();

    let mut targets = vec![config.base_url.to_string()];
    targets.extend(std::env::args().skip(1));

    info!("🩺 Probing {} page(s)...", targets.len());
    for target in targets {
        let page = match fetcher.fetch(&target, None).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Probe {} failed: {:#}", target, e);
                continue;
            }
        };

        let page_url = Url::parse(&page.url).context("fetched page has an invalid URL")?;
        let links = discover_channel_links(&page.body, &page_url, &config.channel_path_markers);
        let stream = extractor.find_stream_url(&page.body, &page_url);
        let iframes = extractor.iframe_sources(&page.body, &page_url);

        info!(
            "Probe {} -> status={}, html_len={}, challenge_page={}, via_browser={}",
            page.url,
            page.status,
            page.body.len(),
            looks_like_challenge_page(&page.body),
            page.via_browser
        );
        info!("  channel links: {}", links.len());
        for link in links.iter().take(5) {
            info!("    {} ({})", channel_name_from_url(link), link);
        }
        info!("  iframes: {}", iframes.len());
        match stream {
            Some(url) => info!("  stream url: {}", url),
            None => info!("  stream url: <none in static HTML>"),
        }
    }

    info!("Probe completed.");
    Ok(())
}
