//! Literal end-to-end scenario vectors from §8 ("Testable Properties"),
//! pinned at the event-construction layer (blob upload itself is exercised
//! in `migrate-net`/`migrate-worker`).

use crate::crypto::{verify_event, EventSigner};
use crate::types::{EventTemplate, SecretBytes};

/// Scenario 1: single-reel post.
///
/// `original_date = "2024-01-02T03:04:05+00:00"` parses to the Unix second
/// `1704164645`; the imeta tag and content shape match §8 scenario 1
/// exactly once a blob hash `H` and url are substituted in.
#[test]
fn scenario_1_single_reel_post() {
    let signer = EventSigner::from_secret_bytes(&SecretBytes([0x11; 32])).unwrap();
    let blob_url = "https://blossom.example/abcd";
    let file_hash = "deadbeef00112233445566778899aabbccddeeff00112233445566778899aa";

    let tags = vec![vec![
        "imeta".to_string(),
        format!("url {blob_url}"),
        format!("x {file_hash}"),
        "m video/mp4".to_string(),
        "size 12345".to_string(),
    ]];
    let content = format!("hi\n\n{blob_url}");

    let template = EventTemplate {
        pubkey: signer.public_key_hex(),
        created_at: 1704164645,
        kind: 1,
        tags,
        content,
    };

    let event = signer.sign_event(template).unwrap();
    assert_eq!(event.created_at, 1704164645);
    assert_eq!(event.kind, 1);
    assert_eq!(event.tags.len(), 1);
    assert!(event.content.starts_with("hi\n\n"));
    assert!(verify_event(&event).unwrap());
}

/// Scenario 2: two-image carousel — a single event carries two `imeta`
/// tags in the same order the media items were supplied.
#[test]
fn scenario_2_carousel_preserves_media_order() {
    let signer = EventSigner::generate();
    let tags = vec![
        vec!["imeta".into(), "url https://blob/1".into(), "x hash1".into()],
        vec!["imeta".into(), "url https://blob/2".into(), "x hash2".into()],
    ];
    let template = EventTemplate {
        pubkey: signer.public_key_hex(),
        created_at: 1,
        kind: 1,
        tags,
        content: String::new(),
    };
    let event = signer.sign_event(template).unwrap();
    assert_eq!(event.tags[0][1], "url https://blob/1");
    assert_eq!(event.tags[1][1], "url https://blob/2");
    assert!(verify_event(&event).unwrap());
}

/// The §8 quantified invariant: `id == SHA256(canonical_serialization(event))`
/// byte-for-byte, independent of which fields are populated.
#[test]
fn event_id_is_sha256_of_canonical_serialization() {
    use crate::canonical::canonical_serialization;
    use crate::crypto::sha256_hex;

    let signer = EventSigner::generate();
    let template = EventTemplate {
        pubkey: signer.public_key_hex(),
        created_at: 42,
        kind: 0,
        tags: vec![],
        content: "{}".into(),
    };
    let expected_id = sha256_hex(&canonical_serialization(&template).unwrap());
    let event = signer.sign_event(template).unwrap();
    assert_eq!(event.id, expected_id);
}
