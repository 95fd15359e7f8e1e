//! Run configuration from environment variables (and `.env` via dotenv).

use anyhow::{anyhow, bail, Context, Result};
use channel_scraper::{FetcherConfig, ResolverConfig, DEFAULT_PATH_MARKERS};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use stream_validator::ValidatorConfig;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.canlitv.me/hd1";

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url:               Url,
    pub output_m3u:             PathBuf,
    pub output_metadata:        PathBuf,
    pub log_dir:                PathBuf,
    pub debug_html_dir:         Option<PathBuf>,
    pub request_timeout:        Duration,
    pub min_request_interval:   Duration,
    pub batch_size:             usize,
    pub batch_pause:            Duration,
    pub max_channels:           Option<usize>,
    pub channel_path_markers:   Vec<String>,
    pub iframe_depth:           usize,
    pub max_iframes_per_page:   usize,
    pub browser_fallback:       bool,
    pub chrome_path:            Option<PathBuf>,
    pub validate_streams:       bool,
    pub validation_retries:     u32,
    pub validation_concurrency: usize,
    pub fallback_playlist:      Option<PathBuf>,
}

impl ScraperConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the config from any key → value source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = get("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base_url).with_context(|| format!("BASE_URL is not a URL: {base_url}"))?;

        let markers = match get("CHANNEL_PATH_MARKERS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_PATH_MARKERS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            base_url,
            output_m3u:             get("OUTPUT_M3U").unwrap_or_else(|| "kanallar.m3u".into()).into(),
            output_metadata:        get("OUTPUT_METADATA").unwrap_or_else(|| "metadata.json".into()).into(),
            log_dir:                get("LOG_DIR").unwrap_or_else(|| "logs".into()).into(),
            debug_html_dir:         get("DEBUG_HTML_DIR").map(PathBuf::from),
            request_timeout:        Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 10u64)?),
            min_request_interval:   Duration::from_millis(parse_or(&get, "MIN_REQUEST_INTERVAL_MS", 500u64)?),
            batch_size:             parse_or(&get, "BATCH_SIZE", 5usize)?,
            batch_pause:            Duration::from_secs(parse_or(&get, "BATCH_PAUSE_SECS", 3u64)?),
            max_channels:           get("MAX_CHANNELS").map(|v| parse_value("MAX_CHANNELS", &v)).transpose()?,
            channel_path_markers:   markers,
            iframe_depth:           parse_or(&get, "IFRAME_DEPTH", 2usize)?,
            max_iframes_per_page:   parse_or(&get, "MAX_IFRAMES_PER_PAGE", 3usize)?,
            browser_fallback:       bool_or(&get, "BROWSER_FALLBACK", false)?,
            chrome_path:            get("CHROME_PATH").map(PathBuf::from),
            validate_streams:       bool_or(&get, "VALIDATE_STREAMS", true)?,
            validation_retries:     parse_or(&get, "VALIDATION_RETRIES", 2u32)?,
            validation_concurrency: parse_or(&get, "VALIDATION_CONCURRENCY", 4usize)?,
            fallback_playlist:      get("FALLBACK_PLAYLIST").map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            bail!("BASE_URL must be http(s), got {}", self.base_url);
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if self.validation_concurrency == 0 {
            bail!("VALIDATION_CONCURRENCY must be greater than 0");
        }
        if self.channel_path_markers.is_empty() {
            bail!("CHANNEL_PATH_MARKERS must list at least one marker");
        }
        Ok(())
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: self.request_timeout,
            min_request_interval: self.min_request_interval,
            browser_fallback: self.browser_fallback,
            chrome_path: self.chrome_path.clone(),
            ..FetcherConfig::default()
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            iframe_depth: self.iframe_depth,
            max_iframes_per_page: self.max_iframes_per_page,
            browser_extraction: self.browser_fallback,
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            timeout: self.request_timeout,
            retries: self.validation_retries,
            concurrency: self.validation_concurrency,
            ..ValidatorConfig::default()
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| anyhow!("{key}={raw:?} is invalid: {e}"))
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key}={raw:?} is not a boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ScraperConfig> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ScraperConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_classic_run() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(cfg.output_m3u, PathBuf::from("kanallar.m3u"));
        assert_eq!(cfg.output_metadata, PathBuf::from("metadata.json"));
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.batch_pause, Duration::from_secs(3));
        assert_eq!(cfg.channel_path_markers, vec!["/izle/".to_string(), "/canli/".to_string()]);
        assert!(cfg.validate_streams);
        assert!(!cfg.browser_fallback);
        assert!(cfg.max_channels.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from_pairs(&[
            ("BASE_URL", "https://example.tv/kanallar"),
            ("MAX_CHANNELS", "12"),
            ("BROWSER_FALLBACK", "yes"),
            ("VALIDATE_STREAMS", "0"),
            ("CHANNEL_PATH_MARKERS", " /watch/ , ,/live/"),
            ("MIN_REQUEST_INTERVAL_MS", "0"),
            ("DEBUG_HTML_DIR", "debug"),
        ])
        .unwrap();

        assert_eq!(cfg.base_url.host_str(), Some("example.tv"));
        assert_eq!(cfg.max_channels, Some(12));
        assert!(cfg.browser_fallback);
        assert!(cfg.resolver_config().browser_extraction);
        assert!(!cfg.validate_streams);
        assert_eq!(cfg.channel_path_markers, vec!["/watch/".to_string(), "/live/".to_string()]);
        assert_eq!(cfg.fetcher_config().min_request_interval, Duration::ZERO);
        assert_eq!(cfg.debug_html_dir, Some(PathBuf::from("debug")));
    }

    #[test]
    fn empty_values_count_as_unset() {
        let cfg = from_pairs(&[("OUTPUT_M3U", "  "), ("MAX_CHANNELS", "")]).unwrap();
        assert_eq!(cfg.output_m3u, PathBuf::from("kanallar.m3u"));
        assert!(cfg.max_channels.is_none());
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = from_pairs(&[("BATCH_SIZE", "five")]).unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
    }

    #[test]
    fn invalid_bool_is_an_error() {
        assert!(from_pairs(&[("VALIDATE_STREAMS", "maybe")]).is_err());
    }

    #[test]
    fn relative_base_url_is_an_error() {
        assert!(from_pairs(&[("BASE_URL", "/hd1")]).is_err());
    }

    #[test]
    fn validate_rejects_non_http_and_zero_sizes() {
        let cfg = from_pairs(&[("BASE_URL", "ftp://example.tv/")]).unwrap();
        assert!(cfg.validate().is_err());

        let cfg = from_pairs(&[("BATCH_SIZE", "0")]).unwrap();
        assert!(cfg.validate().is_err());

        let cfg = from_pairs(&[("CHANNEL_PATH_MARKERS", ",")]).unwrap();
        assert!(cfg.validate().is_err());
    }
}
