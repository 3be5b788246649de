//! Data model for chapter image resolution.
//!
//! A [ChapterRef] goes in; a [ResolutionOutcome] comes out. Everything in between
//! ([FetchResult], [ObfuscatedPayload], [RemovalInstruction]) lives only for the
//! duration of one resolution call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Mobile site base; chapter pages live under `/comic/chapter/id/{comic}/cid/{chapter}`.
pub const SITE_BASE: &str = "https://m.ac.qq.com";

static CID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[?&]cid=|/cid/)(\d+)").expect("valid cid regex"));

/// Ordered list of absolute image URLs. Empty means the strategy that produced it failed.
pub type ImageList = Vec<String>;

/// One chapter of one comic. `chapter_id` may be a bare id or a full chapter URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub comic_id: String,
    pub chapter_id: String,
}

impl ChapterRef {
    pub fn new(comic_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            comic_id: comic_id.into(),
            chapter_id: chapter_id.into(),
        }
    }

    /// True when the chapter id is a full URL rather than a bare id.
    pub fn is_url(&self) -> bool {
        self.chapter_id.contains("http")
    }

    /// Chapter page to fetch. URL ids are used verbatim.
    pub fn page_url(&self) -> String {
        if self.is_url() {
            self.chapter_id.clone()
        } else {
            format!(
                "{}/comic/chapter/id/{}/cid/{}",
                SITE_BASE, self.comic_id, self.chapter_id
            )
        }
    }

    /// Bare chapter id. For URL ids this is the `cid` found in the URL, if any.
    pub fn chapter_key(&self) -> Option<&str> {
        if !self.is_url() {
            return Some(self.chapter_id.as_str());
        }
        CID_REGEX
            .captures(&self.chapter_id)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

/// Raw response of one GET. Owned by the fetcher's caller for one resolution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub status: u16,
    pub body: String,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Obfuscated page data plus the nonce expression needed to reverse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscatedPayload {
    pub cipher_text: String,
    /// Right-hand side of the nonce assignment, unevaluated.
    pub nonce_source: String,
}

/// One deletion derived from a nonce token such as `12abc`: offset 12, run length 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalInstruction {
    pub offset: u64,
    pub run_length: usize,
}

/// Final result of a resolution request. There is no partial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Success(ImageList),
    Failure(String),
}

impl ResolutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionOutcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn page_url_from_bare_ids() {
        let chapter = ChapterRef::new("505430", "12");
        assert_eq!(
            chapter.page_url(),
            "https://m.ac.qq.com/comic/chapter/id/505430/cid/12"
        );
        assert_eq!(chapter.chapter_key(), Some("12"));
        assert!(!chapter.is_url());
    }

    #[test]
    fn page_url_keeps_full_url() {
        let url = "https://m.ac.qq.com/chapter/index/id/505430/cid/7?from=list";
        let chapter = ChapterRef::new("505430", url);
        assert_eq!(chapter.page_url(), url);
        assert_eq!(chapter.chapter_key(), Some("7"));
    }

    #[test]
    fn chapter_key_from_query_parameter() {
        let chapter = ChapterRef::new("1", "https://m.ac.qq.com/chapter/view?id=1&cid=345");
        assert_eq!(chapter.chapter_key(), Some("345"));
    }

    #[test]
    fn chapter_key_missing_in_url() {
        let chapter = ChapterRef::new("1", "https://m.ac.qq.com/comic/index/id/1");
        assert_eq!(chapter.chapter_key(), None);
    }

    #[test]
    fn fetch_result_success_range() {
        let ok = FetchResult {
            status: 204,
            body: String::new(),
        };
        let not_found = FetchResult {
            status: 404,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!not_found.is_success());
    }

    #[test]
    fn outcome_serializes_tagged() -> Result<(), Box<dyn Error>> {
        let outcome = ResolutionOutcome::Success(vec!["https://manhua.acimg.cn/a.jpg".into()]);
        let json = serde_json::to_string(&outcome)?;
        assert_eq!(
            json,
            r#"{"outcome":"success","value":["https://manhua.acimg.cn/a.jpg"]}"#
        );
        let back: ResolutionOutcome = serde_json::from_str(&json)?;
        assert_eq!(back, outcome);
        assert!(back.is_success());
        Ok(())
    }
}
