//! Stream URL extraction from channel page HTML/JS.
//!
//! The cascade is: unescape JSON-style slashes, run the pattern catalogue,
//! then decode base64 payloads (`atob("...")` calls and bare `aHR0c...`
//! literals) and run the catalogue on the decoded text.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::resolve_href;

/// Ordered from most to least specific.
static STREAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"source:\s*['"]([^'"]*\.m3u[^'"]*)['"]"#,
        r#"file:\s*['"]([^'"]*\.m3u[^'"]*)['"]"#,
        r#"src=['"]([^'"]*\.m3u[^'"]*)['"]"#,
        r#""(?:hls|hlsUrl|stream|streamUrl|url|src)"\s*:\s*"([^"]*\.m3u[^"]*)""#,
        r#"(https?://[^'"\s<>]+\.m3u[^'"\s<>]*)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("stream pattern must compile"))
    .collect()
});

static ATOB_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"atob\(\s*['"]([A-Za-z0-9+/=_-]{8,})['"]\s*\)"#).expect("atob pattern must compile")
});

/// Base64 of "http" starts with `aHR0c`.
static BASE64_HTTP_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"](aHR0c[A-Za-z0-9+/=_-]{8,})['"]"#).expect("base64 literal pattern must compile")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamExtractor;

impl StreamExtractor {
    pub fn new() -> Self {
        Self
    }

    /// First stream URL found in `text`, resolved against `page_url`.
    pub fn find_stream_url(&self, text: &str, page_url: &Url) -> Option<String> {
        let text = unescape_js(text);

        if let Some(url) = match_patterns(&text, page_url) {
            return Some(url);
        }

        decode_base64_payloads(&text)
            .iter()
            .find_map(|decoded| match_patterns(&unescape_js(decoded), page_url))
    }

    /// Iframe sources in document order, deduplicated. `data-src` is used
    /// when `src` is missing or does not resolve to an http(s) URL.
    pub fn iframe_sources(&self, html: &str, page_url: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("iframe") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        document
            .select(&selector)
            .filter_map(|frame| {
                let value = frame.value();
                // Lazy players keep `src="about:blank"` until a script swaps in `data-src`.
                [value.attr("src"), value.attr("data-src")]
                    .into_iter()
                    .flatten()
                    .find_map(|src| resolve_href(src, page_url))
            })
            .filter(|url| seen.insert(url.to_string()))
            .collect()
    }
}

fn match_patterns(text: &str, page_url: &Url) -> Option<String> {
    STREAM_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| resolve_stream_candidate(m.as_str(), page_url))
    })
}

fn resolve_stream_candidate(raw: &str, page_url: &Url) -> Option<String> {
    let candidate = raw.trim().replace("&amp;", "&");
    if candidate.is_empty() {
        return None;
    }
    resolve_href(&candidate, page_url).map(String::from)
}

fn unescape_js(text: &str) -> String {
    text.replace("\\/", "/")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
}

fn decode_base64_payloads(text: &str) -> Vec<String> {
    ATOB_CALL
        .captures_iter(text)
        .chain(BASE64_HTTP_LITERAL.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| decode_base64(m.as_str()))
        .collect()
}

fn decode_base64(payload: &str) -> Option<String> {
    [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(payload).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
