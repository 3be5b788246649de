//! Request header profile for page/API fetches and per-image request headers.

use crate::model::ChapterRef;
use reqwest::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, REFERER,
    USER_AGENT,
};
use serde::Serialize;

/// Mobile browser profile; the mobile site serves the smaller chapter page.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const DEFAULT_CONNECTION: &str = "keep-alive";

/// Default header profile: user-agent, accept, language, connection.
///
/// Fails when `user_agent` is not a valid header value (e.g. contains a newline).
pub fn default_profile(user_agent: &str) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
    headers.insert(CONNECTION, HeaderValue::from_static(DEFAULT_CONNECTION));
    Ok(headers)
}

/// Copy of `base` overlaid with `overrides`; a name present in `overrides` replaces
/// every value `base` had for it.
pub fn merged(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut out = base.clone();
    out.extend(overrides.clone());
    out
}

/// Headers an image loader must send with each resolved image URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageHeaders {
    #[serde(rename = "Referer")]
    pub referer: String,
    #[serde(rename = "User-Agent")]
    pub user_agent: String,
}

impl ImageHeaders {
    pub fn to_header_map(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&self.referer)?);
        headers.insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        Ok(headers)
    }
}

/// Pure mapping from an image URL and its chapter to the headers the CDN expects.
///
/// The CDN checks the Referer against the chapter page, so the image URL itself
/// does not change the result; it is accepted to keep the loader contract uniform.
pub fn headers_for(_url: &str, comic_id: &str, chapter_id: &str, user_agent: &str) -> ImageHeaders {
    let chapter = ChapterRef::new(comic_id, chapter_id);
    ImageHeaders {
        referer: chapter.page_url(),
        user_agent: user_agent.to_string(),
    }
}
