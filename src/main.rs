/// canlitv-playlist — Channel Scraper
///
/// What one run does:
///   1. fetches the index page (BASE_URL) and collects channel page links
///   2. resolves each channel to an M3U/M3U8 stream (regex → iframes → headless Chrome)
///   3. probes the streams over HTTP (HEAD / ranged GET, with retries)
///   4. writes kanallar.m3u + metadata.json
///
/// When nothing survives, the fallback channel list is used instead.
///
/// Run:
///   cargo run --bin channel-scraper

use anyhow::{Context, Result};
use canlitv_playlist::{run, ScraperConfig};
use dotenv::dotenv;
use std::env;
use std::fs::File;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let config = ScraperConfig::from_env().context("invalid configuration")?;

    info!("=== canlitv-playlist — channel scraper ===");
    info!("Source:   {}", config.base_url);
    info!("Playlist: {}", config.output_m3u.display());
    info!("Metadata: {}", config.output_metadata.display());
    info!("Browser fallback: {}, validation: {}", config.browser_fallback, config.validate_streams);
    info!("Logs: {}/", config.log_dir.display());

    // Single instance lock
    let lock_file_path = env::temp_dir().join("canlitv_playlist.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of channel-scraper is already running! Exiting.");
            return Ok(());
        }
    };

    let report = run(&config).await?;

    info!("=============================================");
    info!("📊 Discovered: {}", report.discovered);
    info!("🔗 Resolved:   {}", report.resolved);
    info!("✅ Written:    {} (source: {})", report.written, report.source);
    info!("⏱️  Duration:   {:.1}s", report.duration.as_secs_f64());
    info!("=============================================");

    Ok(())
}
