//! Channel link discovery on the index page.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::resolve_href;

const CHANNEL_CARD_SELECTORS: &str = ".channel-card a, .kanal-kutu a, .tv-channel a";

pub const DEFAULT_PATH_MARKERS: [&str; 2] = ["/izle/", "/canli/"];

/// Channel page links found on `page_url`, absolute and deduplicated in
/// first-seen order. Card selectors are tried first, then marker-attribute
/// selectors, then every anchor on the page.
pub fn discover_channel_links(html: &str, page_url: &Url, markers: &[String]) -> Vec<Url> {
    let document = Html::parse_document(html);

    let mut hrefs = select_hrefs(&document, CHANNEL_CARD_SELECTORS);
    if hrefs.is_empty() {
        hrefs = select_hrefs(&document, &marker_selector(markers));
    }

    let links = collect_links(&hrefs, page_url, markers);
    if !links.is_empty() {
        return links;
    }

    let all = select_hrefs(&document, "a[href]");
    collect_links(&all, page_url, markers)
}

fn marker_selector(markers: &[String]) -> String {
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| format!("a[href*=\"{}\"]", m.replace('"', "")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_hrefs(document: &Html, css: &str) -> Vec<String> {
    if css.is_empty() {
        return Vec::new();
    }
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .collect()
}

fn collect_links(hrefs: &[String], page_url: &Url, markers: &[String]) -> Vec<Url> {
    let mut seen = HashSet::new();
    hrefs
        .iter()
        .filter(|href| markers.iter().any(|m| !m.is_empty() && href.contains(m.as_str())))
        .filter_map(|href| resolve_href(href, page_url))
        .filter(|url| seen.insert(url.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        DEFAULT_PATH_MARKERS.iter().map(|m| m.to_string()).collect()
    }

    fn base() -> Url {
        Url::parse("https://www.canlitv.me/hd1").unwrap()
    }

    fn as_strings(links: Vec<Url>) -> Vec<String> {
        links.into_iter().map(String::from).collect()
    }

    #[test]
    fn card_selectors_take_priority() {
        let html = r#"
            <div class="channel-card"><a href="/izle/trt-1">TRT 1</a></div>
            <div class="kanal-kutu"><a href="https://www.canlitv.me/canli/show-tv">Show</a></div>
            <nav><a href="/izle/menu-link">Menu</a></nav>
        "#;
        let links = discover_channel_links(html, &base(), &markers());
        assert_eq!(
            as_strings(links),
            vec![
                "https://www.canlitv.me/izle/trt-1".to_string(),
                "https://www.canlitv.me/canli/show-tv".to_string(),
            ]
        );
    }

    #[test]
    fn card_links_without_markers_are_skipped() {
        let html = r#"
            <div class="tv-channel"><a href="/hakkimizda">About</a></div>
            <div class="tv-channel"><a href="/izle/atv">ATV</a></div>
        "#;
        let links = discover_channel_links(html, &base(), &markers());
        assert_eq!(as_strings(links), vec!["https://www.canlitv.me/izle/atv".to_string()]);
    }

    #[test]
    fn falls_back_to_marker_selectors() {
        let html = r#"
            <ul>
              <li><a href="/izle/kanal-d">Kanal D</a></li>
              <li><a href="/canli/star-tv">Star</a></li>
              <li><a href="/iletisim">Contact</a></li>
            </ul>
        "#;
        let links = discover_channel_links(html, &base(), &markers());
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].as_str(), "https://www.canlitv.me/canli/star-tv");
    }

    #[test]
    fn falls_back_to_all_anchors_when_cards_have_no_channels() {
        let html = r#"
            <div class="channel-card"><a href="/reklam">Ad</a></div>
            <a href="/izle/tv8">TV8</a>
        "#;
        let links = discover_channel_links(html, &base(), &markers());
        assert_eq!(as_strings(links), vec!["https://www.canlitv.me/izle/tv8".to_string()]);
    }

    #[test]
    fn deduplicates_and_strips_fragments() {
        let html = r##"
            <a href="/izle/fox#player">Fox</a>
            <a href="https://www.canlitv.me/izle/fox">Fox again</a>
            <a href="javascript:void('/izle/x')">bad</a>
        "##;
        let links = discover_channel_links(html, &base(), &markers());
        assert_eq!(as_strings(links), vec!["https://www.canlitv.me/izle/fox".to_string()]);
    }

    #[test]
    fn custom_markers() {
        let html = r#"<a href="/watch/cnn-turk">CNN</a><a href="/izle/trt">TRT</a>"#;
        let links = discover_channel_links(html, &base(), &["/watch/".to_string()]);
        assert_eq!(as_strings(links), vec!["https://www.canlitv.me/watch/cnn-turk".to_string()]);
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(discover_channel_links("<html></html>", &base(), &markers()).is_empty());
    }
}
