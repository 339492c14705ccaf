//! Text rules applied to contract input before it reaches the model.
//!
//! Raw text typed by a caller is first passed through [`sanitize_input`]
//! (denylist + hard length cap). Every contract, typed or extracted from a
//! document, must then pass [`validate_contract`] and is normalised with
//! [`sanitize_text`].

use thiserror::Error;

/// Maximum characters kept from raw caller text.
pub const MAX_INPUT_CHARS: usize = 10_000;

/// Minimum trimmed length for text to be considered a contract.
pub const MIN_CONTRACT_CHARS: usize = 50;

/// A contract must contain at least this many distinct indicator terms.
pub const MIN_INDICATORS: usize = 2;

/// Substrings stripped from raw caller text.
const DENYLIST: &[&str] = &["<", ">", "&", "\"", "'", "javascript:", "data:"];

/// Vocabulary that marks text as contract-like. Matched case-insensitively.
pub const CONTRACT_INDICATORS: &[&str] = &[
    "contract",
    "agreement",
    "terms",
    "conditions",
    "clause",
    "party",
    "parties",
    "effective date",
    "termination",
    "liability",
    "indemnification",
    "governing law",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentRejection {
    #[error("text is empty")]
    Empty,
    #[error("text has {chars} characters, at least {MIN_CONTRACT_CHARS} are required")]
    TooShort { chars: usize },
    #[error("text contains {found} contract indicator terms, at least {MIN_INDICATORS} are required")]
    MissingIndicators { found: usize },
}

/// Strip denylisted substrings from raw caller text and cap it at
/// [`MAX_INPUT_CHARS`] characters.
pub fn sanitize_input(text: &str) -> String {
    let mut out = text.to_string();
    for needle in DENYLIST {
        if out.contains(needle) {
            out = out.replace(needle, "");
        }
    }
    if let Some((byte_idx, _)) = out.char_indices().nth(MAX_INPUT_CHARS) {
        out.truncate(byte_idx);
    }
    out.trim().to_string()
}

/// Normalise whitespace: collapse runs inside each line, drop empty lines,
/// and never leave more than two consecutive line breaks.
pub fn sanitize_text(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();

    let mut cleaned = lines.join("\n");
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned.trim().to_string()
}

/// Number of distinct indicator terms present in `text`.
pub fn count_indicators(text: &str) -> usize {
    let lower = text.to_lowercase();
    CONTRACT_INDICATORS
        .iter()
        .filter(|term| lower.contains(*term))
        .count()
}

/// Decide whether `text` looks like a contract.
pub fn validate_contract(text: &str) -> Result<(), ContentRejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ContentRejection::Empty);
    }
    let chars = trimmed.chars().count();
    if chars < MIN_CONTRACT_CHARS {
        return Err(ContentRejection::TooShort { chars });
    }
    let found = count_indicators(trimmed);
    if found < MIN_INDICATORS {
        return Err(ContentRejection::MissingIndicators { found });
    }
    Ok(())
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
