//! Text normalization shared by the geocode cache key and the matcher.

use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Phrase the extraction step emits when it could not read an address.
pub const ADDRESS_NOT_FOUND: &str = "address not found";

/// Lowercase and strip every whitespace character.
pub fn compact_key(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lowercased alphanumeric tokens in input order, duplicates kept.
pub fn tokens(s: &str) -> Vec<String> {
    let lower = s.to_lowercase();
    NON_ALNUM
        .split(&lower)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when an extracted address carries no usable location.
pub fn is_unknown_address(address: &str) -> bool {
    let trimmed = address.trim();
    trimmed.is_empty() || trimmed.to_lowercase().contains(ADDRESS_NOT_FOUND)
}
