//! Sticker set naming
//!
//! Telegram set names must start with a letter, contain only ASCII letters,
//! digits and underscores, end in `_by_<bot_username>` and fit in 64
//! characters. Titles are free text up to 64 characters.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Remote limit on set names
pub const MAX_SET_NAME_LEN: usize = 64;

/// Remote limit on set titles
pub const MAX_TITLE_LEN: usize = 64;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));

fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(len);
    encoded
}

/// Derive the remote set name for a pack titled `display_name` owned by `owner`.
///
/// The result is deterministic. Titles with no usable ASCII characters (for
/// example Cyrillic ones) fall back to a hash of the title. The stem is
/// truncated so the `_by_<bot>` suffix always survives.
pub fn derive_set_name(display_name: &str, owner: i64, bot_username: &str) -> String {
    let slug = INVALID_CHARS
        .replace_all(display_name.trim(), "_")
        .trim_matches('_')
        .to_lowercase();

    let mut stem = if slug.is_empty() {
        format!("p{}", short_hash(display_name, 8))
    } else if slug.starts_with(|c: char| c.is_ascii_alphabetic()) {
        slug
    } else {
        format!("p_{}", slug)
    };

    let tail = format!("_{}_by_{}", owner.unsigned_abs(), bot_username);
    let budget = MAX_SET_NAME_LEN.saturating_sub(tail.len()).max(1);
    // slug is ASCII, byte truncation is safe
    stem.truncate(budget);
    let stem = stem.trim_end_matches('_');

    let mut name = format!("{}{}", stem, tail);
    name.truncate(MAX_SET_NAME_LEN);
    name
}

/// Compact key identifying a set name inside callback data
pub fn pack_key(set_name: &str) -> String {
    short_hash(set_name, 16)
}

/// Validate a user-supplied pack title, returning it trimmed
pub fn validate_title(title: &str) -> Option<&str> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        None
    } else {
        Some(title)
    }
}
