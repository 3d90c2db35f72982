//! Textual `PREFIX(base64)` wrapper around binary serials.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::SerialError;

/// Prefix emitted when encoding
pub const CANONICAL_PREFIX: &str = "WL";

/// Prefixes accepted when decoding (compared case-insensitively).
///
/// `wl` is the current convention; `ttw`, `ttwl` and `bl3` are still found
/// in shared item codes from older editors.
pub const ACCEPTED_PREFIXES: &[&str] = &["wl", "ttw", "ttwl", "bl3"];

/// Return the base64 body of a wrapped serial, or `None` if the wrapper is
/// missing or uses an unknown prefix
pub fn inner_base64(text: &str) -> Option<&str> {
    let text = text.trim();
    let (prefix, rest) = text.split_once('(')?;
    if rest.contains('(') {
        return None;
    }
    let prefix = prefix.to_ascii_lowercase();
    if !ACCEPTED_PREFIXES.contains(&prefix.as_str()) {
        return None;
    }
    rest.strip_suffix(')')
}

/// Decode a wrapped serial such as `WL(BQAAAAB...)` into binary form
pub fn decode_text(text: &str) -> Result<Vec<u8>, SerialError> {
    let inner = inner_base64(text)
        .ok_or_else(|| SerialError::InvalidToken(format!("Unknown item format: {}", text.trim())))?;
    STANDARD
        .decode(inner)
        .map_err(|e| SerialError::InvalidToken(format!("Invalid base64: {}", e)))
}

/// Wrap a binary serial using the canonical prefix
pub fn encode_text(bytes: &[u8]) -> String {
    format!("{}({})", CANONICAL_PREFIX, STANDARD.encode(bytes))
}
