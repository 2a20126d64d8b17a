//! Record identifier derivation.
//!
//! Identifiers must be stable across harvests of the same record, so they are
//! derived from record content only: either a configured identifier field or,
//! as a fallback, a SHA-256 hash of the content.

use sha2::{Digest, Sha256};
use url::Url;

/// Derive a catalog-safe identifier from a raw field value.
///
/// If the value is a URL with a host, the last non-empty path segment is used;
/// query string and fragment are ignored. Anything else is returned unchanged.
///
/// # Examples
/// ```
/// use simpleurl_harvester::ident::resolve;
///
/// assert_eq!(resolve("https://data.example.org/dataset/roads-2024?format=json"), "roads-2024");
/// assert_eq!(resolve("roads-2024"), "roads-2024");
/// ```
#[must_use]
pub fn resolve(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return raw.to_string();
    };
    if url.host().is_none() {
        return raw.to_string();
    }

    // Segments come from the raw text: `Url` would percent-encode them
    let without_scheme = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
    let before_query = without_scheme.split(['?', '#']).next().unwrap_or_default();
    before_query
        .split_once('/')
        .and_then(|(_authority, path)| path.rsplit('/').find(|s| !s.is_empty()))
        .map(String::from)
        .unwrap_or_else(|| raw.to_string())
}

/// Content hash used whenever no identifier can be determined.
///
/// Lowercase hex SHA-256 of the UTF-8 bytes; stable across runs and platforms.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_takes_last_segment() {
        assert_eq!(resolve("https://example.org/api/records/abc-123"), "abc-123");
        assert_eq!(resolve("http://example.org/records/abc-123/"), "abc-123");
        assert_eq!(resolve("https://example.org/a/b?id=zzz#frag"), "b");
    }

    #[test]
    fn test_resolve_keeps_segment_as_written() {
        assert_eq!(resolve("https://data.example.org/dataset/café"), "café");
        assert_eq!(resolve("https://data.example.org/dataset/a b"), "a b");
        assert_eq!(resolve("https://data.example.org/dataset/caf%C3%A9?x=1"), "caf%C3%A9");
        assert_eq!(resolve(" https://data.example.org/dataset/roads \n"), "roads");
    }

    #[test]
    fn test_resolve_keeps_plain_values() {
        assert_eq!(resolve("abc-123"), "abc-123");
        assert_eq!(resolve("urn:uuid:1234"), "urn:uuid:1234");
        assert_eq!(resolve(""), "");
    }

    #[test]
    fn test_resolve_url_without_path() {
        assert_eq!(resolve("https://example.org"), "https://example.org");
        assert_eq!(resolve("https://example.org/?q=1"), "https://example.org/?q=1");
    }

    #[test]
    fn test_resolve_property_over_urls() {
        for id in ["x", "dataset_1", "7f3c", "a.b-c"] {
            for query in ["", "?f=json", "?a=1&b=2"] {
                let url = format!("https://catalog.example.org/collections/c1/items/{id}{query}");
                assert_eq!(resolve(&url), id);
            }
        }
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
