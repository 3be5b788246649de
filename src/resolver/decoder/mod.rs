//! De-obfuscation of the chapter page payload.
//!
//! The page carries a base64 blob with runs of junk characters spliced in, and a nonce
//! whose `digits+letters` tokens say where each run was inserted. Because the scheme is
//! reverse-engineered and changes without notice, decoding is an ordered list of
//! [Hypothesis] implementations; each reduces the cipher text to candidate base64 and
//! the first candidate that decodes to an image list wins.

pub mod expr;
pub mod nonce;

use crate::model::ObfuscatedPayload;
use crate::resolver::error::ResolveError;
use crate::resolver::fields::{images_from_fields, quoted_urls};
use crate::resolver::hosts::HostAllowList;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub use nonce::{Nonce, NonceSource, OffsetMode};

/// Default N values for the strip-every-Nth hypothesis.
pub const DEFAULT_STRIP_EVERY: [usize; 3] = [2, 3, 4];

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

static ENGINES: [GeneralPurpose; 2] = [
    GeneralPurpose::new(&alphabet::STANDARD, LENIENT),
    GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT),
];

static CIPHER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bdata\s*[:=]\s*["']([^"'\s]+)["']"#).expect("valid cipher regex")
});

/// Nonce assignment shapes, most specific first.
static NONCE_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"window\s*\[\s*["']n[^"']*["']\s*\]\s*=\s*([^;\n<]+)"#,
        r#"window\.nonce\s*=\s*([^;\n<]+)"#,
        r#"\b(?:var|let|const)\s+nonce\s*=\s*([^;\n<]+)"#,
        r#"["']?\bnonce["']?\s*:\s*([^;\n<,}]+)"#,
        r#"\bnonce\s*=\s*([^;\n<>]+)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid nonce regex"))
    .collect()
});

/// Pull the cipher text and nonce expression out of a page. `None` unless both are present.
///
/// With several `data` candidates the longest wins; short ones are config values.
pub fn extract_payload(body: &str) -> Option<ObfuscatedPayload> {
    let cipher_text = CIPHER_REGEX
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .max_by_key(String::len)?;
    let nonce_source = NONCE_REGEXES.iter().find_map(|re| {
        re.captures(body)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty())
    })?;
    Some(ObfuscatedPayload {
        cipher_text,
        nonce_source,
    })
}

/// One way of reducing the cipher text to base64.
pub trait Hypothesis: Send + Sync {
    fn name(&self) -> String;

    /// Candidate base64 text, or `None` when the hypothesis does not apply.
    fn reduce(&self, cipher: &str, nonce: &Nonce) -> Option<String>;
}

/// Delete the nonce's runs, last token first.
#[derive(Debug, Clone, Copy)]
pub struct PositionalRuns {
    pub mode: OffsetMode,
}

impl Hypothesis for PositionalRuns {
    fn name(&self) -> String {
        format!("positional-{}", self.mode.as_str())
    }

    fn reduce(&self, cipher: &str, nonce: &Nonce) -> Option<String> {
        let instructions = nonce.instructions();
        if instructions.is_empty() {
            return None;
        }
        Some(nonce::apply_reversed(cipher, &instructions, self.mode))
    }
}

/// Drop every n-th character (1-based positions n, 2n, ...).
#[derive(Debug, Clone, Copy)]
pub struct StripEveryNth {
    pub n: usize,
}

impl Hypothesis for StripEveryNth {
    fn name(&self) -> String {
        format!("strip-every-{}", self.n)
    }

    fn reduce(&self, cipher: &str, _nonce: &Nonce) -> Option<String> {
        if self.n < 2 {
            return None;
        }
        Some(
            cipher
                .chars()
                .enumerate()
                .filter(|(i, _)| (i + 1) % self.n != 0)
                .map(|(_, c)| c)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reversed;

impl Hypothesis for Reversed {
    fn name(&self) -> String {
        "reversed".to_string()
    }

    fn reduce(&self, cipher: &str, _nonce: &Nonce) -> Option<String> {
        Some(cipher.chars().rev().collect())
    }
}

/// Keep only base64 characters, from either the standard or the URL-safe alphabet.
#[derive(Debug, Clone, Copy)]
pub struct Base64AlphabetOnly;

impl Hypothesis for Base64AlphabetOnly {
    fn name(&self) -> String {
        "base64-alphabet".to_string()
    }

    fn reduce(&self, cipher: &str, _nonce: &Nonce) -> Option<String> {
        let kept: String = cipher
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '-' | '_' | '='))
            .collect();
        if kept.len() == cipher.len() {
            // Nothing stripped; identical to decoding the raw text.
            return None;
        }
        Some(kept)
    }
}

/// The cipher text as served, for pages that skip the junk insertion.
#[derive(Debug, Clone, Copy)]
pub struct Raw;

impl Hypothesis for Raw {
    fn name(&self) -> String {
        "raw".to_string()
    }

    fn reduce(&self, cipher: &str, _nonce: &Nonce) -> Option<String> {
        Some(cipher.to_string())
    }
}

/// Default hypothesis order: configured positional mode, the other positional mode,
/// strip-every-N for each N, reversed text, base64-alphabet filter, then the raw text.
pub fn default_hypotheses(mode: OffsetMode, strip_every: &[usize]) -> Vec<Box<dyn Hypothesis>> {
    let mut list: Vec<Box<dyn Hypothesis>> = vec![
        Box::new(PositionalRuns { mode }),
        Box::new(PositionalRuns { mode: mode.other() }),
    ];
    for &n in strip_every {
        list.push(Box::new(StripEveryNth { n }));
    }
    list.push(Box::new(Reversed));
    list.push(Box::new(Base64AlphabetOnly));
    list.push(Box::new(Raw));
    list
}

/// Obfuscation decoder over an ordered hypothesis list.
pub struct Decoder {
    hypotheses: Vec<Box<dyn Hypothesis>>,
    hosts: HostAllowList,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(
            default_hypotheses(OffsetMode::default(), &DEFAULT_STRIP_EVERY),
            HostAllowList::default(),
        )
    }
}

impl Decoder {
    pub fn new(hypotheses: Vec<Box<dyn Hypothesis>>, hosts: HostAllowList) -> Self {
        Self { hypotheses, hosts }
    }

    pub fn hypothesis_names(&self) -> Vec<String> {
        self.hypotheses.iter().map(|h| h.name()).collect()
    }

    /// Extract the payload from `body` and decode it.
    pub fn decode_page(&self, body: &str) -> Result<Vec<String>, ResolveError> {
        let payload = extract_payload(body)
            .ok_or_else(|| ResolveError::decode("page has no obfuscated data and nonce"))?;
        self.decode(&payload.cipher_text, &payload.nonce_source)
    }

    /// Try each hypothesis in order; the first that yields allowed image URLs wins.
    pub fn decode(&self, cipher_text: &str, nonce_source: &str) -> Result<Vec<String>, ResolveError> {
        let nonce = nonce::resolve(nonce_source);
        debug!(
            tokens = nonce.tokens.len(),
            source = ?nonce.source,
            "nonce resolved"
        );
        let mut tried = 0usize;
        let mut last_err: Option<ResolveError> = None;
        for hypothesis in &self.hypotheses {
            let Some(candidate) = hypothesis.reduce(cipher_text, &nonce) else {
                continue;
            };
            tried += 1;
            match self.decode_candidate(&candidate) {
                Ok(urls) => {
                    debug!(hypothesis = %hypothesis.name(), count = urls.len(), "decoded");
                    return Ok(urls);
                }
                Err(e) => {
                    debug!(hypothesis = %hypothesis.name(), error = %e, "hypothesis failed");
                    last_err = Some(e);
                }
            }
        }
        let last = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no hypothesis applied".to_string());
        Err(ResolveError::decode(format!(
            "{} hypothesis(es) tried, none produced images; last: {}",
            tried, last
        )))
    }

    /// Base64 → UTF-8 → image fields, falling back to a quoted-URL scan.
    fn decode_candidate(&self, candidate: &str) -> Result<Vec<String>, ResolveError> {
        let bytes = decode_base64(candidate)?;
        let text = String::from_utf8(bytes).map_err(|e| ResolveError::decode(e.to_string()))?;
        if let Ok(urls) = images_from_fields(&text, |u| self.hosts.filter(u)) {
            if !urls.is_empty() {
                return Ok(urls);
            }
        }
        let urls = self.hosts.filter(quoted_urls(&text));
        if urls.is_empty() {
            return Err(ResolveError::decode("decoded text has no image URLs"));
        }
        Ok(urls)
    }
}

/// Lenient base64: whitespace ignored, padding optional, standard then URL-safe alphabet.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, ResolveError> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() {
        return Err(ResolveError::decode("empty base64 text"));
    }
    let mut last = None;
    for engine in &ENGINES {
        match engine.decode(&clean) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last = Some(e),
        }
    }
    Err(ResolveError::decode(format!(
        "invalid base64: {}",
        last.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};

    pub(crate) const PLAIN: &str = r#"{"comic":{"id":505430},"chapter":{"cid":12},"picture":[{"pid":1,"width":800,"url":"https://manhua.acimg.cn/manhua_detail/0/1.jpg"},{"pid":2,"width":800,"url":"https://manhua.acimg.cn/manhua_detail/0/2.jpg"}]}"#;

    /// Forward obfuscation: insert each token's letters at its offset, first token first.
    pub(crate) fn obfuscate(plain_b64: &str, tokens: &[&str]) -> String {
        let mut chars: Vec<char> = plain_b64.chars().collect();
        for token in tokens {
            let ins = nonce::instruction_for(token).expect("valid token");
            let letters: Vec<char> = token.chars().skip_while(|c| c.is_ascii_digit()).collect();
            let at = (ins.offset as usize).min(chars.len());
            chars.splice(at..at, letters);
        }
        chars.into_iter().collect()
    }

    fn expected() -> Vec<String> {
        vec![
            "https://manhua.acimg.cn/manhua_detail/0/1.jpg".to_string(),
            "https://manhua.acimg.cn/manhua_detail/0/2.jpg".to_string(),
        ]
    }

    #[test]
    fn round_trip_recovers_plaintext() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        let tokens = ["3abc", "5de", "40xyz", "17q"];
        let cipher = obfuscate(&b64, &tokens);
        assert_ne!(cipher, b64);
        let nonce = nonce::resolve(&format!("\"{}\"", tokens.concat()));
        for mode in [OffsetMode::Modulo, OffsetMode::ByteMask] {
            let reduced = nonce::apply_reversed(&cipher, &nonce.instructions(), mode);
            assert_eq!(reduced, b64);
            assert_eq!(decode_base64(&reduced)?, PLAIN.as_bytes());
        }
        assert_eq!(Decoder::default().decode(&cipher, "'3abc5de40xyz17q'")?, expected());
        Ok(())
    }

    #[test]
    fn evaluated_nonce_decodes() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        let cipher = obfuscate(&b64, &["12ab", "30cd"]);
        let urls = Decoder::default().decode(&cipher, "(4 * 3) + 'ab' + 30 + 'cd'")?;
        assert_eq!(urls, expected());
        Ok(())
    }

    #[test]
    fn byte_mask_offsets_over_255() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        // 300 & 255 == 44
        let cipher = {
            let mut chars: Vec<char> = b64.chars().collect();
            chars.splice(44..44, "zz".chars());
            chars.into_iter().collect::<String>()
        };
        let decoder = Decoder::new(
            vec![Box::new(PositionalRuns {
                mode: OffsetMode::ByteMask,
            })],
            HostAllowList::default(),
        );
        assert_eq!(decoder.decode(&cipher, "\"300zz\"")?, expected());
        Ok(())
    }

    /// Forward modulo obfuscation: each run lands where its removal will look for it,
    /// i.e. at the offset reduced modulo the length after insertion.
    fn obfuscate_modulo(plain_b64: &str, tokens: &[&str]) -> String {
        let mut chars: Vec<char> = plain_b64.chars().collect();
        for token in tokens {
            let ins = nonce::instruction_for(token).expect("valid token");
            let letters: Vec<char> = token.chars().skip_while(|c| c.is_ascii_digit()).collect();
            let at = (ins.offset % (chars.len() + letters.len()) as u64) as usize;
            assert!(at <= chars.len(), "offset {} lands past the end", ins.offset);
            chars.splice(at..at, letters);
        }
        chars.into_iter().collect()
    }

    #[test]
    fn modulo_offsets_wrap_past_the_end() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        assert!(b64.len() < 900);
        let tokens = ["900zz", "1000q"];
        let cipher = obfuscate_modulo(&b64, &tokens);
        let nonce = nonce::resolve("\"900zz1000q\"");
        assert_eq!(nonce.tokens, tokens);
        assert_eq!(
            nonce::apply_reversed(&cipher, &nonce.instructions(), OffsetMode::Modulo),
            b64
        );
        assert_eq!(Decoder::default().decode(&cipher, "\"900zz1000q\"")?, expected());
        Ok(())
    }

    #[test]
    fn unobfuscated_payload_decodes_as_served() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        assert_eq!(Decoder::default().decode(&b64, "'1a'")?, expected());
        assert_eq!(Decoder::default().decode(&b64, "''")?, expected());
        let raw_only = Decoder::new(vec![Box::new(Raw)], HostAllowList::default());
        assert_eq!(raw_only.decode(&b64, "'3abc5de'")?, expected());
        Ok(())
    }

    #[test]
    fn url_safe_payload_survives_alphabet_filter() -> Result<(), ResolveError> {
        let plain = r#"{"picture":[{"url":"https://manhua.acimg.cn/manhua_detail/0/1.jpg"}],"sig":"??????"}"#;
        let b64 = URL_SAFE.encode(plain);
        assert!(b64.contains('_'), "{}", b64);
        let noisy: String = b64
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i % 10 == 0 { vec!['!', c] } else { vec![c] })
            .collect();
        let urls = Decoder::default().decode(&noisy, "'1a'")?;
        assert_eq!(urls, vec!["https://manhua.acimg.cn/manhua_detail/0/1.jpg"]);
        Ok(())
    }

    #[test]
    fn missing_tokens_fall_back_to_alternate_hypotheses() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        let reversed: String = b64.chars().rev().collect();
        let urls = Decoder::default().decode(&reversed, "'no tokens here'")?;
        assert_eq!(urls, expected());
        Ok(())
    }

    #[test]
    fn strip_every_nth_hypothesis() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        let mut cipher = String::new();
        for (i, c) in b64.chars().enumerate() {
            cipher.push(c);
            if i % 2 == 1 {
                cipher.push('Q');
            }
        }
        // Every third character is junk.
        let urls = Decoder::default().decode(&cipher, "''")?;
        assert_eq!(urls, expected());
        Ok(())
    }

    #[test]
    fn non_alphabet_noise_is_stripped() -> Result<(), ResolveError> {
        let b64 = STANDARD.encode(PLAIN);
        let noisy: String = b64
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i % 7 == 0 { vec!['~', c] } else { vec![c] })
            .collect();
        let urls = Decoder::default().decode(&noisy, "'1a'")?;
        assert_eq!(urls, expected());
        Ok(())
    }

    #[test]
    fn quoted_url_fallback_when_no_known_field() -> Result<(), ResolveError> {
        let plain = r#"{"pages":{"list":"x","first":"https:\/\/manhua.acimg.cn\/p\/1.png"}}"#;
        let b64 = STANDARD.encode(plain);
        let cipher = obfuscate(&b64, &["2kk"]);
        let urls = Decoder::default().decode(&cipher, "\"2kk\"")?;
        assert_eq!(urls, vec!["https://manhua.acimg.cn/p/1.png"]);
        Ok(())
    }

    #[test]
    fn foreign_hosts_fail_decoding() {
        let plain = r#"{"picture":[{"url":"https://via.placeholder.com/800x1200"}]}"#;
        let b64 = STANDARD.encode(plain);
        let result = Decoder::default().decode(&b64, "\"\"");
        assert!(matches!(result, Err(ResolveError::Decode { .. })));
    }

    #[test]
    fn garbage_exhausts_hypotheses() {
        let result = Decoder::default().decode("!!!not-base64!!!", "\"3abc\"");
        match result {
            Err(ResolveError::Decode { reason }) => assert!(reason.contains("hypothesis")),
            other => panic!("expected Decode, got {:?}", other),
        }
    }

    #[test]
    fn lenient_base64_variants() -> Result<(), ResolveError> {
        // "ab?" encodes with '/' in the standard alphabet and '_' in the URL-safe one.
        assert_eq!(decode_base64("YWI/")?, b"ab?");
        assert_eq!(decode_base64("YWI_")?, b"ab?");
        assert_eq!(decode_base64("YQ")?, b"a");
        assert_eq!(decode_base64("YQ==")?, b"a");
        assert_eq!(decode_base64("YW\nJj")?, b"abc");
        assert!(decode_base64("").is_err());
        assert!(decode_base64("Y").is_err());
        Ok(())
    }

    #[test]
    fn extract_payload_shapes() {
        let body = r#"<script nonce="csp1">var cfg = {data: 'short'};
var DATA = 'QUJDREVGR0hJSktMTU5PUA==';
window["n\x6fnce"] = "1a" + '2b';</script>"#;
        let payload = extract_payload(body).expect("payload present");
        assert_eq!(payload.cipher_text, "QUJDREVGR0hJSktMTU5PUA==");
        assert_eq!(payload.nonce_source, r#""1a" + '2b'"#);

        let object_form = r#"{ data:'QUJDRA==', nonce: "3abc5de" }"#;
        let payload = extract_payload(object_form).expect("payload present");
        assert_eq!(payload.cipher_text, "QUJDRA==");
        assert_eq!(payload.nonce_source, "\"3abc5de\"");
    }

    #[test]
    fn extract_payload_requires_both_parts() {
        assert!(extract_payload("var DATA = 'QUJD';").is_none());
        assert!(extract_payload("window.nonce = '1a';").is_none());
        assert!(Decoder::default().decode_page("<html></html>").is_err());
    }

    #[test]
    fn default_order_puts_configured_mode_first() {
        let names = Decoder::new(
            default_hypotheses(OffsetMode::ByteMask, &[2]),
            HostAllowList::default(),
        )
        .hypothesis_names();
        assert_eq!(
            names,
            vec![
                "positional-byte_mask",
                "positional-modulo",
                "strip-every-2",
                "reversed",
                "base64-alphabet",
                "raw"
            ]
        );
    }
}
