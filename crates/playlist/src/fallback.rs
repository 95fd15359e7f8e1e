//! Fallback channel list, used when scraping yields no playable channel.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::{parse_m3u, Channel};

/// Public broadcaster streams that do not depend on the scraped site.
const BUILTIN: [(&str, &str); 6] = [
    ("TRT 1",        "https://tv-trt1.medya.trt.com.tr/master.m3u8"),
    ("TRT Haber",    "https://tv-trthaber.medya.trt.com.tr/master.m3u8"),
    ("TRT Spor",     "https://tv-trtspor1.medya.trt.com.tr/master.m3u8"),
    ("TRT Belgesel", "https://tv-trtbelgesel.medya.trt.com.tr/master.m3u8"),
    ("TRT Çocuk",    "https://tv-trtcocuk.medya.trt.com.tr/master.m3u8"),
    ("TRT Müzik",    "https://tv-trtmuzik.medya.trt.com.tr/master.m3u8"),
];

pub fn builtin_channels() -> Vec<Channel> {
    BUILTIN
        .iter()
        .map(|(name, url)| Channel::resolved(*name, *url, *url))
        .collect()
}

/// Channels from an operator-provided M3U file.
pub fn load_file(path: &Path) -> Result<Vec<Channel>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read fallback playlist {}", path.display()))?;
    let channels = parse_m3u(&text);
    info!("Loaded {} fallback channels from {}", channels.len(), path.display());
    Ok(channels)
}

/// File entries first, then the built-in table; later duplicates of a stream
/// URL are dropped.
pub fn merge(file_channels: Vec<Channel>, builtin: Vec<Channel>) -> Vec<Channel> {
    let mut seen = HashSet::new();
    file_channels
        .into_iter()
        .chain(builtin)
        .filter(|c| c.is_resolved())
        .filter(|c| seen.insert(c.stream_url.clone().unwrap_or_default()))
        .collect()
}

/// The full fallback list; a missing or unreadable file is an error so the
/// caller can decide whether to continue with the built-in table alone.
pub fn channels(extra: Option<&Path>) -> Result<Vec<Channel>> {
    let file_channels = match extra {
        Some(path) => load_file(path)?,
        None => Vec::new(),
    };
    Ok(merge(file_channels, builtin_channels()))
}
