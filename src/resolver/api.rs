//! Structured-endpoint fallback. An optimization only: every failure is silent.

use crate::model::ChapterRef;
use crate::resolver::client::Fetcher;
use crate::resolver::error::ResolveError;
use crate::resolver::fields::urls_from_array;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use crate::resolver::hosts::HostAllowList;
use serde_json::Value;
use tracing::debug;

/// Endpoint templates tried in order. `{comic_id}` and `{chapter_id}` are substituted.
pub const DEFAULT_API_ENDPOINTS: [&str; 2] = [
    "https://m.ac.qq.com/chapter/getChapterData?id={comic_id}&cid={chapter_id}",
    "https://ac.qq.com/ComicView/getChapterData/id/{comic_id}/cid/{chapter_id}",
];

/// Keys whose array value is the image list, searched breadth-first.
const ARRAY_KEYS: [&str; 4] = ["picture", "images", "pictures", "content"];
/// Keys that carry the success indicator.
const STATUS_KEYS: [&str; 4] = ["success", "status", "code", "ret"];
const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct ApiResolver {
    endpoints: Vec<String>,
    hosts: HostAllowList,
}

impl Default for ApiResolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_API_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            HostAllowList::default(),
        )
    }
}

impl ApiResolver {
    pub fn new(endpoints: Vec<String>, hosts: HostAllowList) -> Self {
        Self { endpoints, hosts }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Concrete endpoint URLs for `chapter`; empty when a URL chapter id has no `cid`.
    pub fn endpoint_urls(&self, chapter: &ChapterRef) -> Vec<String> {
        let Some(key) = chapter.chapter_key() else {
            return Vec::new();
        };
        self.endpoints
            .iter()
            .map(|t| {
                t.replace("{comic_id}", &chapter.comic_id)
                    .replace("{chapter_id}", key)
            })
            .collect()
    }

    /// Try each endpoint in order. Exhausting the list yields an empty list, never an error.
    pub fn try_apis(&self, fetcher: &Fetcher, chapter: &ChapterRef) -> Vec<String> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        if let Ok(referer) = HeaderValue::from_str(&chapter.page_url()) {
            headers.insert(REFERER, referer);
        }
        for url in self.endpoint_urls(chapter) {
            match self.try_endpoint(fetcher, &url, &headers) {
                Ok(urls) if !urls.is_empty() => {
                    debug!(endpoint = %url, count = urls.len(), "api resolved");
                    return urls;
                }
                Ok(_) => debug!(endpoint = %url, "api returned no allowed images"),
                Err(ResolveError::Cancelled) => return Vec::new(),
                Err(e) => debug!(endpoint = %url, error = %e, "api endpoint failed"),
            }
        }
        Vec::new()
    }

    fn try_endpoint(
        &self,
        fetcher: &Fetcher,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<String>, ResolveError> {
        let result = fetcher.fetch(url, headers, fetcher.max_attempts())?;
        if !result.is_success() {
            return Err(ResolveError::parse(
                "api response",
                format!("HTTP {}", result.status),
            ));
        }
        Ok(self.hosts.filter(parse_api_body(&result.body)?))
    }
}

/// Image URLs from a structured API body. Requires a success indicator.
pub fn parse_api_body(body: &str) -> Result<Vec<String>, ResolveError> {
    let value: Value =
        serde_json::from_str(body.trim()).map_err(|e| ResolveError::parse("api response", e))?;
    if !indicates_success(&value) {
        return Err(ResolveError::parse("api response", "missing success indicator"));
    }
    let items = find_image_array(&value)
        .ok_or_else(|| ResolveError::parse("api response", "no image array"))?;
    Ok(urls_from_array(items))
}

fn indicates_success(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    STATUS_KEYS.iter().any(|k| match obj.get(*k) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => matches!(n.as_i64(), Some(0) | Some(200)),
        Some(Value::String(s)) => {
            let s = s.trim().to_ascii_lowercase();
            s == "ok" || s == "success" || s == "0" || s == "200"
        }
        _ => false,
    })
}

/// Breadth-first search for the first non-empty array under an image key.
fn find_image_array(value: &Value) -> Option<&Vec<Value>> {
    let mut level: Vec<&Value> = vec![value];
    for _ in 0..=MAX_DEPTH {
        let mut next = Vec::new();
        for v in level {
            let Some(obj) = v.as_object() else {
                continue;
            };
            for key in ARRAY_KEYS {
                if let Some(Value::Array(items)) = obj.get(key) {
                    if !items.is_empty() {
                        return Some(items);
                    }
                }
            }
            next.extend(obj.values().filter(|c| c.is_object()));
        }
        if next.is_empty() {
            break;
        }
        level = next;
    }
    None
}
