//! One scraping run: index page → channel links → stream URLs → validation →
//! playlist + metadata.

use anyhow::Result;
use channel_scraper::{discover_channel_links, BlockedPage, ChannelResolver, PageFetcher};
use logger::{
    now_iso, ChannelDroppedEvent, ChannelResolvedEvent, EventLogger, FetchStatusEvent, RunSummaryEvent,
    StreamValidatedEvent,
};
use playlist::{channel_name_from_url, fallback, write_run_outputs, Channel, PlaylistSource, RunMetadata};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use stream_validator::{ProbeTarget, StreamValidator};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub discovered: usize,
    pub resolved:   usize,
    pub written:    usize,
    pub source:     PlaylistSource,
    pub duration:   Duration,
}

pub async fn run(config: &ScraperConfig) -> Result<RunReport> {
    let started = Instant::now();
    let events = EventLogger::new(&config.log_dir);
    let mut resolver = ChannelResolver::new(PageFetcher::new(config.fetcher_config()), config.resolver_config());
    let validator = StreamValidator::new(config.validator_config());

    let mut links = discover(&mut resolver, config, &events).await;
    if let Some(max) = config.max_channels {
        links.truncate(max);
    }
    let discovered = links.len();
    info!("📺 Discovered {} channel links", discovered);

    let resolved = resolve_all(&mut resolver, &links, config, &events).await;
    let resolved_count = resolved.len();
    info!("🔗 Stream URL found for {}/{} channels", resolved_count, discovered);

    let mut channels = if config.validate_streams {
        validate(&validator, resolved, &events).await
    } else {
        resolved
    };
    let mut processed = discovered;
    let mut source = PlaylistSource::Scrape;

    if channels.is_empty() {
        warn!("No playable channel scraped, switching to the fallback list");
        let candidates = fallback_candidates(config);
        processed = candidates.len();
        channels = if config.validate_streams {
            validate(&validator, candidates, &events).await
        } else {
            candidates
        };
        source = PlaylistSource::Fallback;
    }

    let metadata = RunMetadata::from_channels(now_iso(), &channels, processed, source);
    let written = write_run_outputs(&config.output_m3u, &config.output_metadata, &channels, &metadata)?;
    info!("💾 Playlist saved: {} ({} channels)", config.output_m3u.display(), written);
    info!("💾 Metadata saved: {}", config.output_metadata.display());

    let report = RunReport {
        discovered,
        resolved: resolved_count,
        written,
        source,
        duration: started.elapsed(),
    };

    events.log_or_warn(&RunSummaryEvent {
        ts:            now_iso(),
        event:         "RUN_SUMMARY",
        base_url:      config.base_url.to_string(),
        discovered:    report.discovered,
        resolved:      report.resolved,
        written:       report.written,
        source:        report.source.to_string(),
        duration_secs: report.duration.as_secs_f64(),
    });

    Ok(report)
}

async fn discover(resolver: &mut ChannelResolver, config: &ScraperConfig, events: &EventLogger) -> Vec<Url> {
    info!("🔍 Fetching channel list from {}", config.base_url);

    let page = match resolver.fetcher_mut().fetch(config.base_url.as_str(), None).await {
        Ok(page) => page,
        Err(e) => {
            warn!("Index page fetch failed: {:#}", e);
            let blocked = e.downcast_ref::<BlockedPage>();
            if let Some(blocked) = blocked {
                dump_html(config.debug_html_dir.as_deref(), "index", &blocked.body);
            }
            events.log_or_warn(&FetchStatusEvent {
                ts:          now_iso(),
                event:       "FETCH_STATUS",
                url:         config.base_url.to_string(),
                ok:          false,
                status_code: blocked.map(|b| b.status),
                via_browser: false,
                message:     format!("{:#}", e),
            });
            return Vec::new();
        }
    };

    events.log_or_warn(&FetchStatusEvent {
        ts:          now_iso(),
        event:       "FETCH_STATUS",
        url:         page.url.clone(),
        ok:          true,
        status_code: Some(page.status),
        via_browser: page.via_browser,
        message:     format!("{} bytes", page.body.len()),
    });

    let page_url = Url::parse(&page.url).unwrap_or_else(|_| config.base_url.clone());
    let links = discover_channel_links(&page.body, &page_url, &config.channel_path_markers);
    if links.is_empty() {
        dump_html(config.debug_html_dir.as_deref(), "index", &page.body);
    }
    links
}

async fn resolve_all(
    resolver: &mut ChannelResolver,
    links: &[Url],
    config: &ScraperConfig,
    events: &EventLogger,
) -> Vec<Channel> {
    let total = links.len();
    let mut channels = Vec::new();

    for (i, link) in links.iter().enumerate() {
        let name = channel_name_from_url(link);
        info!("[{}/{}] Resolving {}", i + 1, total, name);

        match resolver.resolve(link).await {
            Ok(Some(resolution)) => {
                debug!("{} → {} via {}", name, resolution.stream_url, resolution.method);
                events.log_or_warn(&ChannelResolvedEvent {
                    ts:         now_iso(),
                    event:      "CHANNEL_RESOLVED",
                    name:       name.clone(),
                    source_url: link.to_string(),
                    stream_url: resolution.stream_url.clone(),
                    method:     resolution.method.to_string(),
                });
                channels.push(Channel::resolved(name, link.as_str(), resolution.stream_url));
            }
            Ok(None) => {
                warn!("No stream URL found for {}", link);
                dump_html(config.debug_html_dir.as_deref(), &debug_slug(i, link), resolver.last_html().unwrap_or_default());
                log_dropped(events, &name, link.as_str(), "extract", "no stream url found");
            }
            Err(e) => {
                warn!("Channel page {} failed: {:#}", link, e);
                if let Some(blocked) = e.downcast_ref::<BlockedPage>() {
                    dump_html(config.debug_html_dir.as_deref(), &debug_slug(i, link), &blocked.body);
                }
                log_dropped(events, &name, link.as_str(), "fetch", &format!("{:#}", e));
            }
        }

        let done = i + 1;
        if done % config.batch_size == 0 && done < total && !config.batch_pause.is_zero() {
            debug!("Batch of {} done, pausing {}s", config.batch_size, config.batch_pause.as_secs());
            sleep(config.batch_pause).await;
        }
    }

    channels
}

async fn validate(validator: &StreamValidator, channels: Vec<Channel>, events: &EventLogger) -> Vec<Channel> {
    let targets: Vec<ProbeTarget> = channels
        .iter()
        .enumerate()
        .filter_map(|(index, c)| {
            let url = c.stream_url.clone()?;
            let referer = (c.source_url != url).then(|| c.source_url.clone());
            Some(ProbeTarget { index, url, referer })
        })
        .collect();

    info!("🔬 Validating {} streams...", targets.len());
    let results = validator.validate_all(&targets).await;

    let mut keep = vec![false; channels.len()];
    for (index, result) in &results {
        let channel = &channels[*index];
        events.log_or_warn(&StreamValidatedEvent {
            ts:          now_iso(),
            event:       "STREAM_VALIDATED",
            name:        channel.name.clone(),
            stream_url:  channel.stream_url.clone().unwrap_or_default(),
            valid:       result.is_valid,
            status_code: result.status,
            response_ms: result.response_time.as_millis() as u64,
            attempts:    result.attempts,
            error:       result.error.clone(),
        });

        if result.is_valid {
            keep[*index] = true;
        } else {
            log_dropped(
                events,
                &channel.name,
                &channel.source_url,
                "validate",
                result.error.as_deref().unwrap_or("invalid stream"),
            );
        }
    }

    channels
        .into_iter()
        .zip(keep)
        .filter_map(|(channel, keep)| keep.then_some(channel))
        .collect()
}

fn fallback_candidates(config: &ScraperConfig) -> Vec<Channel> {
    match fallback::channels(config.fallback_playlist.as_deref()) {
        Ok(channels) => channels,
        Err(e) => {
            warn!("{:#}; using the built-in fallback table only", e);
            fallback::builtin_channels()
        }
    }
}

fn log_dropped(events: &EventLogger, name: &str, source_url: &str, stage: &str, reason: &str) {
    events.log_or_warn(&ChannelDroppedEvent {
        ts:         now_iso(),
        event:      "CHANNEL_DROPPED",
        name:       name.to_string(),
        source_url: source_url.to_string(),
        stage:      stage.to_string(),
        reason:     reason.to_string(),
    });
}

/// File-name-safe slug from the channel's position and URL path; the
/// position keeps paths that sanitise alike (`a.b`, `a_b`) apart.
fn debug_slug(index: usize, url: &Url) -> String {
    let slug: String = url
        .path()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "page" } else { slug };
    format!("{:03}-{}", index + 1, slug)
}

fn dump_html(dir: Option<&Path>, slug: &str, html: &str) {
    let Some(dir) = dir else {
        return;
    };
    if html.is_empty() {
        return;
    }

    let path = dir.join(format!("{slug}.html"));
    let result = fs::create_dir_all(dir).and_then(|_| fs::write(&path, html));
    match result {
        Ok(()) => debug!("Debug HTML saved to {}", path.display()),
        Err(e) => warn!("Debug HTML dump to {} failed: {}", path.display(), e),
    }
}
