//! canlitv-playlist — scrape live-TV channel pages into an M3U playlist.
//!
//! The heavy lifting lives in the workspace crates (`channel_scraper`,
//! `stream_validator`, `playlist`, `logger`); this crate holds the run
//! configuration and the pipeline that wires them together.

pub mod config;
pub mod pipeline;

pub use config::ScraperConfig;
pub use pipeline::{run, RunReport};
