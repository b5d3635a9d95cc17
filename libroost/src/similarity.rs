//! Content-similarity guard
//!
//! Near-duplicate posts across a fleet are a platform-enforcement signal,
//! so candidate bodies are compared against recently published ones with
//! a token-set Jaccard measure over a normalized form.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Similarity at or above this is treated as a duplicate.
pub const SIMILARITY_THRESHOLD: f64 = 0.86;

/// Length of the hex fingerprint prefix stored as `similarity_key`.
const FINGERPRINT_LEN: usize = 24;

fn url_pattern() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

/// Normalize a body for comparison: lowercase, URLs stripped, mention and
/// hashtag sigils dropped, every other non-alphanumeric char collapsed to
/// whitespace, tokens shorter than 2 chars discarded.
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase();
    let without_urls = url_pattern().replace_all(&lowered, " ");

    let cleaned: String = without_urls
        .chars()
        .filter(|&c| c != '@' && c != '#')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short content fingerprint: hex SHA-256 of the normalized body,
/// truncated. A coarse lookup hint, not an identity.
pub fn fingerprint(s: &str) -> String {
    let digest = Sha256::digest(normalize(s).as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(FINGERPRINT_LEN);
    out
}

fn token_set(s: &str) -> HashSet<String> {
    normalize(s).split_whitespace().map(str::to_owned).collect()
}

/// Jaccard similarity over normalized token sets. Either side empty → 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - intersection;
    intersection as f64 / union as f64
}

/// Whether `candidate` is too close to anything in `corpus`.
pub fn too_similar(candidate: &str, corpus: &[String], threshold: f64) -> bool {
    corpus
        .iter()
        .any(|existing| similarity(candidate, existing) >= threshold)
}
