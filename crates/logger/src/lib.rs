/// canlitv-playlist — Logger
/// JSONL event stream, one file per UTC day

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Cannot create log dir {}: {}", dir.display(), e);
        }
        Self { log_dir: dir }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Like `log`, but a failed write only produces a tracing warning.
    pub fn log_or_warn<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("Event log write failed: {}", e);
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event types ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct FetchStatusEvent {
    pub ts:           String,
    pub event:        &'static str,   // "FETCH_STATUS"
    pub url:          String,
    pub ok:           bool,
    pub status_code:  Option<u16>,
    pub via_browser:  bool,
    pub message:      String,
}

#[derive(Serialize, Debug)]
pub struct ChannelResolvedEvent {
    pub ts:           String,
    pub event:        &'static str,   // "CHANNEL_RESOLVED"
    pub name:         String,
    pub source_url:   String,
    pub stream_url:   String,
    pub method:       String,         // "pattern" | "iframe:<depth>" | "browser"
}

#[derive(Serialize, Debug)]
pub struct ChannelDroppedEvent {
    pub ts:           String,
    pub event:        &'static str,   // "CHANNEL_DROPPED"
    pub name:         String,
    pub source_url:   String,
    pub stage:        String,         // "fetch" | "extract" | "validate"
    pub reason:       String,
}

#[derive(Serialize, Debug)]
pub struct StreamValidatedEvent {
    pub ts:           String,
    pub event:        &'static str,   // "STREAM_VALIDATED"
    pub name:         String,
    pub stream_url:   String,
    pub valid:        bool,
    pub status_code:  Option<u16>,
    pub response_ms:  u64,
    pub attempts:     u32,
    pub error:        Option<String>,
}

#[derive(Serialize, Debug)]
pub struct RunSummaryEvent {
    pub ts:             String,
    pub event:          &'static str, // "RUN_SUMMARY"
    pub base_url:       String,
    pub discovered:     usize,
    pub resolved:       usize,
    pub written:        usize,
    pub source:         String,       // "scrape" | "fallback"
    pub duration_secs:  f64,
}
