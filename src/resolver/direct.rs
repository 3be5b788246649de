//! Plaintext image-list extraction from a raw chapter page, plus the last-resort scan.

use crate::resolver::error::ResolveError;
use crate::resolver::fields::{images_from_fields, quoted_urls};
use crate::resolver::hosts::HostAllowList;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

/// Image file extensions accepted by the `src=` and raw-URL scans.
const IMAGE_EXT: &str = r"(?:jpe?g|png|gif|webp|bmp)";
/// Attributes that lazy-loading markup uses for the real image source.
const IMG_ATTRS: [&str; 3] = ["src", "data-src", "data-original"];

static SRC_ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)\bsrc\s*=\s*["']?([^"'\s>]+?\.{IMAGE_EXT}(?:\?[^"'\s>]*)?)(?:["'\s>]|$)"#
    ))
    .expect("valid src regex")
});

static RAW_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)(?:https?:)?//[^\s"'<>()\\]+?\.{IMAGE_EXT}(?:\?[^\s"'<>()\\]*)?"#
    ))
    .expect("valid raw url regex")
});

type Pattern = fn(&str, &HostAllowList) -> Result<Vec<String>, ResolveError>;

/// Patterns tried in order; the first with at least one allowed URL wins.
const PATTERNS: [(&str, Pattern); 3] = [
    ("image-field", field_pattern),
    ("quoted-url", quoted_pattern),
    ("src-attribute", src_pattern),
];

/// Direct-match extractor: finds image URLs that are already plaintext in the page.
#[derive(Debug, Clone, Default)]
pub struct DirectMatcher {
    hosts: HostAllowList,
}

impl DirectMatcher {
    pub fn new(hosts: HostAllowList) -> Self {
        Self { hosts }
    }

    /// Ordered pattern scan. Never fails: a pattern that errors is skipped.
    pub fn extract(&self, body: &str) -> Vec<String> {
        for (name, pattern) in PATTERNS {
            match pattern(body, &self.hosts) {
                Ok(urls) if !urls.is_empty() => {
                    debug!(pattern = name, count = urls.len(), "direct match");
                    return urls;
                }
                Ok(_) => debug!(pattern = name, "no match"),
                Err(e) => debug!(pattern = name, error = %e, "pattern failed"),
            }
        }
        Vec::new()
    }

    /// Last resort: `<img>` sources from the parsed document, then any raw image URL.
    pub fn last_resort(&self, body: &str) -> Vec<String> {
        let from_dom = match img_sources(body) {
            Ok(urls) => self.hosts.filter(urls),
            Err(e) => {
                debug!(error = %e, "img scan failed");
                Vec::new()
            }
        };
        if !from_dom.is_empty() {
            return from_dom;
        }
        let raw = RAW_URL_REGEX
            .find_iter(body)
            .map(|m| absolutize(m.as_str()))
            .collect();
        self.hosts.filter(dedupe(raw))
    }
}

fn field_pattern(body: &str, hosts: &HostAllowList) -> Result<Vec<String>, ResolveError> {
    images_from_fields(body, |urls| hosts.filter(urls))
}

fn quoted_pattern(body: &str, hosts: &HostAllowList) -> Result<Vec<String>, ResolveError> {
    Ok(hosts.filter(quoted_urls(body)))
}

fn src_pattern(body: &str, hosts: &HostAllowList) -> Result<Vec<String>, ResolveError> {
    let urls = SRC_ATTR_REGEX
        .captures_iter(body)
        .map(|c| absolutize(&c[1]))
        .collect();
    Ok(hosts.filter(dedupe(urls)))
}

fn img_sources(body: &str) -> Result<Vec<String>, ResolveError> {
    let doc = Html::parse_document(body);
    let selector = Selector::parse("img").map_err(|e| ResolveError::parse("img selector", e))?;
    let urls = doc
        .select(&selector)
        .filter_map(|el| {
            IMG_ATTRS
                .iter()
                .filter_map(|a| el.value().attr(a))
                .map(str::trim)
                .find(|v| !v.is_empty() && !v.starts_with("data:"))
                .map(absolutize)
        })
        .collect();
    Ok(dedupe(urls))
}

/// Promote protocol-relative `//host/path` to https.
fn absolutize(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> DirectMatcher {
        DirectMatcher::new(HostAllowList::new(["img.example", "acimg.cn"]))
    }

    #[test]
    fn plaintext_images_field() {
        let body = r#"<script>var c = {"images":["https://img.example/a.jpg","https://img.example/b.jpg"]};</script>"#;
        assert_eq!(
            matcher().extract(body),
            vec!["https://img.example/a.jpg", "https://img.example/b.jpg"]
        );
    }

    #[test]
    fn malformed_field_falls_through_to_quoted_scan() {
        let body = r#"{"picture":[{url:'x'}], "cover": "https://img.example/cover.jpg"}"#;
        assert_eq!(matcher().extract(body), vec!["https://img.example/cover.jpg"]);
    }

    #[test]
    fn src_attribute_scan_requires_image_extension() {
        let body = r#"<img src=//manhua.acimg.cn/ch/1.jpg?w=800><script src="https://manhua.acimg.cn/app.js"></script><img class="p" src='https://manhua.acimg.cn/ch/2.webp'>"#;
        assert_eq!(
            matcher().extract(body),
            vec![
                "https://manhua.acimg.cn/ch/1.jpg?w=800",
                "https://manhua.acimg.cn/ch/2.webp"
            ]
        );
    }

    #[test]
    fn body_without_images_is_empty() {
        let body = "<html><head><title>Chapter</title></head><body><p>Nothing here.</p></body></html>";
        assert!(matcher().extract(body).is_empty());
        assert!(matcher().extract("").is_empty());
        assert!(matcher().extract("{\"images\":[").is_empty());
    }

    #[test]
    fn foreign_hosts_are_filtered_out() {
        let body = r#"{"images":["https://via.placeholder.com/800x1200.jpg","https://img.example/a.jpg"]}"#;
        assert_eq!(matcher().extract(body), vec!["https://img.example/a.jpg"]);
        let only_foreign = r#"{"images":["https://via.placeholder.com/800x1200.jpg"]}"#;
        assert!(matcher().extract(only_foreign).is_empty());
    }

    #[test]
    fn last_resort_prefers_lazy_img_attributes() {
        let body = r#"<div><img data-src="https://manhua.acimg.cn/l/1.jpg" src="data:image/gif;base64,R0lG"><img src="https://img.example/2.png"></div>"#;
        assert_eq!(
            matcher().last_resort(body),
            vec!["https://manhua.acimg.cn/l/1.jpg", "https://img.example/2.png"]
        );
    }

    #[test]
    fn last_resort_raw_scan_without_markup() {
        let body = "pages: https://img.example/a.jpg, //manhua.acimg.cn/b.png and https://other.test/c.jpg";
        assert_eq!(
            matcher().last_resort(body),
            vec!["https://img.example/a.jpg", "https://manhua.acimg.cn/b.png"]
        );
    }
}
