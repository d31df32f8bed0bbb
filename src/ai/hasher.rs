//! Cache key derivation for bookmark content.
//!
//! The key covers title, url and description only. Two bookmarks with the
//! same content share a key (and therefore cached tags) regardless of id.

use sha2::{Digest, Sha256};

use crate::bookmarks::Bookmark;

/// Field delimiter used when joining the content triple.
const DELIMITER: &str = "|";

/// Normalized text that gets digested: `title|url|description`, lowercased and trimmed.
pub fn normalized_content(bookmark: &Bookmark) -> String {
    [
        bookmark.title.as_str(),
        bookmark.url.as_str(),
        bookmark.description.as_str(),
    ]
    .join(DELIMITER)
    .to_lowercase()
    .trim()
    .to_string()
}

/// SHA-256 of the normalized content, hex encoded (64 chars).
pub fn content_hash(bookmark: &Bookmark) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_content(bookmark).as_bytes());
    format!("{:x}", hasher.finalize())
}
