/// canlitv-playlist — Playlist
/// Channel records, M3U output/input and the run metadata snapshot

pub mod fallback;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use url::Url;

// ── Channel ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name:       String,
    /// Channel page the stream was scraped from; identity of the record.
    pub source_url: String,
    pub stream_url: Option<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            name:       name.into(),
            source_url: source_url.into(),
            stream_url: None,
        }
    }

    pub fn resolved(name: impl Into<String>, source_url: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            name:       name.into(),
            source_url: source_url.into(),
            stream_url: Some(stream_url.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.stream_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// Display name from a channel page URL: `/izle/trt-haber` → "Trt Haber".
pub fn channel_name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string);

    let Some(segment) = segment else {
        return url.host_str().unwrap_or("Channel").to_string();
    };

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);

    let stem = match decoded.rsplit_once('.') {
        Some((stem, ext)) if ["html", "htm", "php", "aspx", "m3u", "m3u8"].contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => decoded.as_str(),
    };

    let spaced = stem.replace(['-', '_'], " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    title_case(&collapsed).nfc().collect()
}

/// Upper-cases the first letter of every alphabetic run, lower-cases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

// ── M3U ──────────────────────────────────────────────────────────────────────

fn sanitize_name(name: &str) -> String {
    name.split(['\r', '\n']).map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
}

/// `#EXTM3U` playlist with one entry per resolved channel, in input order.
pub fn render_m3u(channels: &[Channel]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for channel in channels.iter().filter(|c| c.is_resolved()) {
        let stream_url = channel.stream_url.as_deref().unwrap_or_default().trim();
        out.push_str(&format!("#EXTINF:-1,{}\n{}\n", sanitize_name(&channel.name), stream_url));
    }
    out
}

/// Writes the playlist and returns the number of entries written.
pub fn write_m3u(path: &Path, channels: &[Channel]) -> Result<usize> {
    let staged = stage(path, &render_m3u(channels))?;
    commit(&staged, path)?;
    Ok(resolved_count(channels))
}

fn resolved_count(channels: &[Channel]) -> usize {
    channels.iter().filter(|c| c.is_resolved()).count()
}

/// Reads `#EXTINF` name / URL pairs. Entries without `#EXTINF` get a name
/// derived from the URL; other directives are ignored.
pub fn parse_m3u(text: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(rest) = line.strip_prefix("#EXTINF") {
            pending_name = extinf_title(rest);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let Ok(url) = Url::parse(line) else {
            pending_name = None;
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            pending_name = None;
            continue;
        }

        let name = pending_name
            .take()
            .unwrap_or_else(|| channel_name_from_url(&url));
        channels.push(Channel::resolved(name, url.as_str(), url.as_str()));
    }

    channels
}

/// Title after the first comma outside quoted attribute values.
fn extinf_title(rest: &str) -> Option<String> {
    let mut in_quotes = false;
    for (i, c) in rest.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let title = rest[i + 1..].trim();
                return (!title.is_empty()).then(|| title.to_string());
            }
            _ => {}
        }
    }
    None
}

// ── Metadata ─────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistSource {
    Scrape,
    Fallback,
}

impl fmt::Display for PlaylistSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistSource::Scrape => write!(f, "scrape"),
            PlaylistSource::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetadataChannel {
    pub name:       String,
    /// Source page URL.
    pub url:        String,
    pub stream_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub last_updated:   String,
    pub channel_count:  usize,
    pub valid_channels: usize,
    pub source:         PlaylistSource,
    pub channels:       Vec<MetadataChannel>,
}

impl RunMetadata {
    /// Snapshot of a run; `channels` lists exactly what `render_m3u` writes.
    pub fn from_channels(
        last_updated: impl Into<String>,
        channels: &[Channel],
        processed: usize,
        source: PlaylistSource,
    ) -> Self {
        let written: Vec<MetadataChannel> = channels
            .iter()
            .filter(|c| c.is_resolved())
            .map(|c| MetadataChannel {
                name:       sanitize_name(&c.name),
                url:        c.source_url.clone(),
                stream_url: c.stream_url.as_deref().unwrap_or_default().trim().to_string(),
            })
            .collect();

        Self {
            last_updated: last_updated.into(),
            channel_count: processed,
            valid_channels: written.len(),
            source,
            channels: written,
        }
    }
}

/// Pretty JSON with a trailing newline.
pub fn render_metadata(metadata: &RunMetadata) -> Result<String> {
    let mut json = serde_json::to_string_pretty(metadata)?;
    json.push('\n');
    Ok(json)
}

pub fn write_metadata(path: &Path, metadata: &RunMetadata) -> Result<()> {
    let staged = stage(path, &render_metadata(metadata)?)?;
    commit(&staged, path)
}

/// Writes playlist and metadata as a pair: both files are staged before either
/// target is replaced, so a failed write leaves the previous pair in place.
pub fn write_run_outputs(
    m3u_path: &Path,
    metadata_path: &Path,
    channels: &[Channel],
    metadata: &RunMetadata,
) -> Result<usize> {
    let playlist = render_m3u(channels);
    let json = render_metadata(metadata)?;

    let staged_m3u = stage(m3u_path, &playlist)?;
    let staged_metadata = match stage(metadata_path, &json) {
        Ok(staged) => staged,
        Err(e) => {
            let _ = fs::remove_file(&staged_m3u);
            return Err(e);
        }
    };

    commit(&staged_m3u, m3u_path)?;
    commit(&staged_metadata, metadata_path)?;
    Ok(resolved_count(channels))
}

/// Writes `contents` to `<path>.tmp` next to the target.
fn stage(path: &Path, contents: &str) -> Result<PathBuf> {
    ensure_parent(path)?;
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let staged = path.with_file_name(name);
    fs::write(&staged, contents).with_context(|| format!("write {}", staged.display()))?;
    Ok(staged)
}

fn commit(staged: &Path, path: &Path) -> Result<()> {
    fs::rename(staged, path).with_context(|| format!("replace {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}
