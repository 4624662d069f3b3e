//! Markdown Image Rewriter (C5): pure, regex-driven image URL extraction
//! and rewriting (§4.5).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!\[[^\]]*\]\(([^\s)]+)").unwrap())
}

/// Extract image URLs from Markdown in document order.
pub fn extract(md: &str) -> Vec<String> {
    image_pattern()
        .captures_iter(md)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Replace image URLs present as keys in `map` with their mapped value.
/// Unknown URLs (not in `map`) are left verbatim as CDN fallbacks; Markdown
/// structure outside the image syntax is untouched.
pub fn rewrite(md: &str, map: &BTreeMap<String, String>) -> String {
    image_pattern()
        .replace_all(md, |caps: &regex::Captures| {
            let whole = caps.get(0).unwrap().as_str();
            let url = caps.get(1).unwrap().as_str();
            match map.get(url) {
                Some(replacement) => whole.replacen(url, replacement, 1),
                None => whole.to_string(),
            }
        })
        .into_owned()
}
