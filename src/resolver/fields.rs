//! Text scanners shared by the direct-match extractor and the decoder.

use crate::resolver::error::ResolveError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Field names that hold the page image array, in preference order.
pub const IMAGE_FIELDS: [&str; 3] = ["picture", "images", "content"];
/// Keys of an array element object that carry the image URL.
const URL_KEYS: [&str; 2] = ["url", "img"];

static FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']?\b(picture|images|content)["']?\s*:\s*\["#).expect("valid field regex")
});

static QUOTED_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[:,\[]\s*["'](https?:(?:\\?/){2}[^"'\s<>]+)["']"#)
        .expect("valid quoted url regex")
});

/// Find the matching closing bracket for the first '[' in s, skipping content inside JSON strings.
pub fn extract_json_array_with_strings(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (byte_offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            if c == '\\' {
                escape = true;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + byte_offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

/// URLs from a JSON image array: string elements directly, objects via `url` / `img`.
pub fn urls_from_array(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => URL_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Scan `text` for `picture` / `images` / `content` arrays and return the URLs of the first
/// one that parses and is non-empty once `accept` is applied.
///
/// Returns `Ok(vec![])` when no field is present; `Err(Parse)` when fields are present
/// but none of them parse as a JSON array.
pub fn images_from_fields<F>(text: &str, accept: F) -> Result<Vec<String>, ResolveError>
where
    F: Fn(Vec<String>) -> Vec<String>,
{
    let mut last_err: Option<ResolveError> = None;
    for field in IMAGE_FIELDS {
        for caps in FIELD_REGEX.captures_iter(text) {
            if &caps[1] != field {
                continue;
            }
            let Some(whole) = caps.get(0) else {
                continue;
            };
            // The match ends just past '['; step back onto it.
            let array_start = whole.end() - 1;
            let Some(slice) = extract_json_array_with_strings(&text[array_start..]) else {
                last_err = Some(ResolveError::parse(
                    format!("{} field", field),
                    "unterminated array",
                ));
                continue;
            };
            match serde_json::from_str::<Vec<Value>>(slice) {
                Ok(items) => {
                    let urls = accept(urls_from_array(&items));
                    if !urls.is_empty() {
                        return Ok(urls);
                    }
                }
                Err(e) => last_err = Some(ResolveError::parse(format!("{} field", field), e)),
            }
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}

/// Quoted http(s) values in JSON/JS value position (after `:`, `,` or `[`), JSON-escaped
/// slashes undone, first occurrence kept. Markup attributes (`src="..."`) are not matched.
pub fn quoted_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in QUOTED_URL_REGEX.captures_iter(text) {
        let url = caps[1].replace("\\/", "/");
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep_all(urls: Vec<String>) -> Vec<String> {
        urls
    }

    #[test]
    fn array_extraction_skips_brackets_in_strings() {
        let s = r#"x = ["a]b", ["c"]] tail"#;
        assert_eq!(extract_json_array_with_strings(s), Some(r#"["a]b", ["c"]]"#));
        assert_eq!(extract_json_array_with_strings("no array"), None);
        assert_eq!(extract_json_array_with_strings("[1, 2"), None);
    }

    #[test]
    fn picture_objects_yield_url_then_img() -> Result<(), ResolveError> {
        let text = r#"{"picture":[{"pid":1,"url":"https:\/\/manhua.acimg.cn\/1.jpg"},{"img":"https://manhua.acimg.cn/2.jpg"},{"width":3}]}"#;
        let urls = images_from_fields(text, keep_all)?;
        assert_eq!(
            urls,
            vec!["https://manhua.acimg.cn/1.jpg", "https://manhua.acimg.cn/2.jpg"]
        );
        Ok(())
    }

    #[test]
    fn bare_js_key_is_recognized() -> Result<(), ResolveError> {
        let text = r#"var conf = { images: ["https://img.example/a.jpg"] };"#;
        assert_eq!(images_from_fields(text, keep_all)?, vec!["https://img.example/a.jpg"]);
        Ok(())
    }

    #[test]
    fn picture_preferred_over_images() -> Result<(), ResolveError> {
        let text = r#"{"images":["https://img.example/i.jpg"],"picture":["https://img.example/p.jpg"]}"#;
        assert_eq!(images_from_fields(text, keep_all)?, vec!["https://img.example/p.jpg"]);
        Ok(())
    }

    #[test]
    fn malformed_array_reports_parse_error() {
        let text = r#"{"images":['https://img.example/a.jpg']}"#;
        assert!(matches!(
            images_from_fields(text, keep_all),
            Err(ResolveError::Parse { .. })
        ));
    }

    #[test]
    fn rejected_urls_fall_through_to_next_field() -> Result<(), ResolveError> {
        let text = r#"{"picture":["https://ads.test/x.jpg"],"images":["https://img.example/a.jpg"]}"#;
        let urls = images_from_fields(text, |u| {
            u.into_iter().filter(|s| s.contains("img.example")).collect()
        })?;
        assert_eq!(urls, vec!["https://img.example/a.jpg"]);
        Ok(())
    }

    #[test]
    fn no_field_is_empty_not_error() -> Result<(), ResolveError> {
        assert!(images_from_fields("<html>nothing</html>", keep_all)?.is_empty());
        Ok(())
    }

    #[test]
    fn quoted_urls_unescape_and_dedupe() {
        let text = r#"{"a":"https:\/\/x.test\/1.jpg","b":['https://x.test/2.png'],"c": "https://x.test/1.jpg","d":"ftp://no"} <img src="https://x.test/3.jpg">"#;
        assert_eq!(
            quoted_urls(text),
            vec!["https://x.test/1.jpg", "https://x.test/2.png"]
        );
    }
}
