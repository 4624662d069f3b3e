//! Slug derivation for Article Processor (C9), §4.9.

use md5::{Digest, Md5};

/// Last non-empty path segment of `link`, with non-`[A-Za-z0-9-]`
/// characters replaced by `-`, runs of `-` collapsed, leading/trailing `-`
/// trimmed, lowercased. Falls back to the first 12 hex chars of
/// `MD5(link)` if that yields an empty string.
pub fn derive_slug(link: &str) -> String {
    let last_segment = link
        .trim_end_matches('/')
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");

    let normalized: String = last_segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    let collapsed = collapse_hyphens(&normalized);
    let trimmed = collapsed.trim_matches('-').to_lowercase();

    if trimmed.is_empty() {
        let digest = Md5::digest(link.as_bytes());
        hex::encode(digest)[..12].to_string()
    } else {
        trimmed
    }
}

fn collapse_hyphens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_hyphen = false;
    for c in s.chars() {
        if c == '-' {
            if !last_was_hyphen {
                out.push(c);
            }
            last_was_hyphen = true;
        } else {
            out.push(c);
            last_was_hyphen = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_last_path_segment() {
        assert_eq!(
            derive_slug("https://example.com/blog/My Great Post!"),
            "my-great-post"
        );
    }

    #[test]
    fn collapses_and_trims_hyphens() {
        assert_eq!(derive_slug("https://x/--weird___name--"), "weird-name");
    }

    #[test]
    fn ignores_trailing_slash() {
        assert_eq!(derive_slug("https://example.com/a/b/"), "b");
    }

    #[test]
    fn falls_back_to_md5_when_empty() {
        let slug = derive_slug("https://example.com/???");
        assert_eq!(slug.len(), 12);
        assert!(slug.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn only_lowercase_alnum_and_hyphen_no_double_hyphen() {
        let slug = derive_slug("https://x/Some Title With Spaces");
        assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(!slug.contains("--"));
        assert!(!slug.starts_with('-'));
        assert!(!slug.ends_with('-'));
    }
}
