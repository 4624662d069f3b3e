//! Canonical serialization for Nostr event identity (§4.1, §6).
//!
//! The event id is `SHA256` of the JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, serialized with no
//! insignificant whitespace, minimal separators (`,` / `:`), and Unicode
//! left untouched (no ASCII-escaping of non-ASCII content). `serde_json`'s
//! compact writer already produces exactly this shape — unlike the original
//! Python source, which had to pass `ensure_ascii=False` explicitly to get
//! the same effect, Rust's default is to emit UTF-8 without escaping.
//!
//! Any deviation (extra whitespace, field reordering, ASCII-escaping)
//! produces a different hash and an unverifiable event; this module is the
//! single point where that serialization happens.

use crate::error::{Error, Result};
use crate::types::EventTemplate;
use serde_json::Value;

/// Serialize an [`EventTemplate`] to the exact bytes that are SHA-256'd to
/// produce the event id.
pub fn canonical_serialization(template: &EventTemplate) -> Result<Vec<u8>> {
    let array = Value::Array(vec![
        Value::from(0),
        Value::from(template.pubkey.as_str()),
        Value::from(template.created_at),
        Value::from(template.kind),
        tags_to_value(&template.tags),
        Value::from(template.content.as_str()),
    ]);
    serde_json::to_vec(&array).map_err(Error::from)
}

fn tags_to_value(tags: &[Vec<String>]) -> Value {
    Value::Array(
        tags.iter()
            .map(|tag| Value::Array(tag.iter().map(|s| Value::from(s.as_str())).collect()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_minimal_separator_shape() {
        let template = EventTemplate {
            pubkey: "abc123".into(),
            created_at: 1704164645,
            kind: 1,
            tags: vec![vec!["imeta".into(), "url https://blob/x".into()]],
            content: "hi".into(),
        };
        let bytes = canonical_serialization(&template).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            r#"[0,"abc123",1704164645,1,[["imeta","url https://blob/x"]],"hi"]"#
        );
    }

    #[test]
    fn preserves_unicode_without_ascii_escaping() {
        let template = EventTemplate {
            pubkey: "abc".into(),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: "héllo \u{1F600}".into(),
        };
        let bytes = canonical_serialization(&template).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains('é'));
        assert!(text.contains('\u{1F600}'));
    }

    #[test]
    fn deterministic_for_same_input() {
        let template = EventTemplate {
            pubkey: "abc".into(),
            created_at: 10,
            kind: 1,
            tags: vec![],
            content: "x".into(),
        };
        let a = canonical_serialization(&template).unwrap();
        let b = canonical_serialization(&template).unwrap();
        assert_eq!(a, b);
    }
}
