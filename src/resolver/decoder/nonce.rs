//! Nonce resolution: turn the raw nonce assignment into `digits+letters` tokens and
//! removal instructions.

use crate::model::RemovalInstruction;
use crate::resolver::decoder::expr;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+[A-Za-z]+").expect("valid nonce token regex"));

static LITERAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:"([^"\\]*)"|'([^'\\]*)')$"#).expect("valid literal regex")
});

/// How a token's numeric prefix becomes a string offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMode {
    /// Offset modulo the current cipher text length.
    #[default]
    Modulo,
    /// Offset masked to a byte (`& 255`), clamped to the string.
    ByteMask,
}

impl OffsetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetMode::Modulo => "modulo",
            OffsetMode::ByteMask => "byte_mask",
        }
    }

    pub fn other(&self) -> OffsetMode {
        match self {
            OffsetMode::Modulo => OffsetMode::ByteMask,
            OffsetMode::ByteMask => OffsetMode::Modulo,
        }
    }

    /// Concrete start index for a string of `len` characters.
    pub fn offset_for(&self, raw: u64, len: usize) -> usize {
        match self {
            OffsetMode::Modulo if len == 0 => 0,
            OffsetMode::Modulo => (raw % len as u64) as usize,
            OffsetMode::ByteMask => (raw & 0xff) as usize,
        }
    }
}

/// Where the resolved nonce string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceSource {
    Literal,
    Evaluated,
    Scanned,
}

/// Resolved nonce with its tokens in forward order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    pub value: String,
    pub tokens: Vec<String>,
    pub source: NonceSource,
}

impl Nonce {
    /// Removal instructions in forward (token) order.
    pub fn instructions(&self) -> Vec<RemovalInstruction> {
        self.tokens.iter().filter_map(|t| instruction_for(t)).collect()
    }
}

/// Resolve the nonce assignment's right-hand side.
///
/// A quoted literal is used as-is; otherwise the expression is evaluated by the
/// restricted evaluator. When evaluation fails or yields no tokens, the raw source
/// is scanned for `digits+letters` runs which are concatenated.
pub fn resolve(nonce_source: &str) -> Nonce {
    let trimmed = nonce_source.trim().trim_end_matches(';').trim();
    if let Some(caps) = LITERAL_REGEX.captures(trimmed) {
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let tokens = tokenize(&value);
        if !tokens.is_empty() {
            return Nonce {
                value,
                tokens,
                source: NonceSource::Literal,
            };
        }
    }
    match expr::eval_to_string(trimmed) {
        Ok(value) => {
            let tokens = tokenize(&value);
            if !tokens.is_empty() {
                return Nonce {
                    value,
                    tokens,
                    source: NonceSource::Evaluated,
                };
            }
            debug!(value = %value, "evaluated nonce has no tokens, scanning source");
        }
        Err(e) => debug!(error = %e, "nonce evaluation failed, scanning source"),
    }
    let tokens = tokenize(trimmed);
    Nonce {
        value: tokens.concat(),
        tokens,
        source: NonceSource::Scanned,
    }
}

/// `digits+letters` tokens in order of appearance.
pub fn tokenize(nonce: &str) -> Vec<String> {
    TOKEN_REGEX
        .find_iter(nonce)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// `"12abc"` → offset 12, run length 3. Offsets that overflow saturate.
pub fn instruction_for(token: &str) -> Option<RemovalInstruction> {
    let split = token.find(|c: char| !c.is_ascii_digit())?;
    let (digits, letters) = token.split_at(split);
    if digits.is_empty() || letters.is_empty() {
        return None;
    }
    let offset = digits.bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
    });
    Some(RemovalInstruction {
        offset,
        run_length: letters.chars().count(),
    })
}

/// Apply `instructions` last-to-first, deleting each run from the current string.
///
/// Offsets are relative to the string before any later-listed deletion, so the last
/// instruction must be applied first.
pub fn apply_reversed(cipher: &str, instructions: &[RemovalInstruction], mode: OffsetMode) -> String {
    let mut chars: Vec<char> = cipher.chars().collect();
    for ins in instructions.iter().rev() {
        remove_run(&mut chars, ins, mode);
    }
    chars.into_iter().collect()
}

/// Delete one run in place; out-of-range runs are clamped to the string end.
pub(crate) fn remove_run(chars: &mut Vec<char>, ins: &RemovalInstruction, mode: OffsetMode) {
    let len = chars.len();
    let start = mode.offset_for(ins.offset, len).min(len);
    let end = start.saturating_add(ins.run_length).min(len);
    chars.drain(start..end);
}
