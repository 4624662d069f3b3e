//! Event Signer (C1): BIP-340 Schnorr signing and SHA-256 hashing.
//!
//! Nonce generation, secret/nonce negation on odd-Y points, and the tagged
//! hashes (`BIP0340/aux`, `BIP0340/nonce`, `BIP0340/challenge`) are all
//! implemented by the `secp256k1` crate's `sign_schnorr_with_aux_rand`,
//! which is RFC-conformant BIP-340 — there is no hand-rolled curve
//! arithmetic here, unlike the Python original, which reimplemented the
//! algorithm by hand because its ECDSA library had no Schnorr support.

use crate::error::{Error, Result};
use crate::types::{Event, EventTemplate, KeySource, SecretBytes};
use secp256k1::rand::rngs::OsRng;
use secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes, lowercase hex. Used for both event ids and
/// blob content-addressing.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Stateless signer: holds a keypair, signs events. Safe to use from
/// multiple tasks concurrently (no shared mutable state, per §4.1).
pub struct EventSigner {
    keypair: Keypair,
}

impl EventSigner {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (keypair, _) = secp.generate_keypair(&mut OsRng);
        Self {
            keypair: Keypair::from_secret_key(&secp, &keypair),
        }
    }

    pub fn from_secret_bytes(secret: &SecretBytes) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair =
            Keypair::from_seckey_slice(&secp, &secret.0).map_err(|_| Error::InvalidSecretKey)?;
        Ok(Self { keypair })
    }

    /// 32-byte x-only public key, lowercase hex.
    pub fn public_key_hex(&self) -> String {
        let (xonly, _parity) = self.keypair.x_only_public_key();
        hex::encode(xonly.serialize())
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.keypair.secret_bytes()
    }

    /// Sign an [`EventTemplate`], producing a fully-formed [`Event`] with
    /// `id` and `sig` populated.
    pub fn sign_event(&self, template: EventTemplate) -> Result<Event> {
        let serialized = crate::canonical::canonical_serialization(&template)?;
        let digest = sha256(&serialized);
        let id_hex = hex::encode(digest);

        let secp = Secp256k1::new();
        let msg = Message::from_digest(digest);
        let sig = secp.sign_schnorr(&msg, &self.keypair);

        Ok(Event {
            id: id_hex,
            pubkey: template.pubkey,
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(sig.as_ref() as &[u8]),
        })
    }
}

/// Resolves a [`KeySource`] to a concrete signer and signs one event with
/// it. `build_template` is handed the resolved pubkey hex and returns the
/// template to sign, so the pubkey embedded in the event and the keypair
/// that produces its signature always come from the same resolution —
/// there is no seam left where an `EphemeralKey` pubkey and its signing
/// keypair could be generated independently.
pub fn sign_with_key_source(
    key_source: &KeySource,
    build_template: impl FnOnce(String) -> EventTemplate,
) -> Result<Event> {
    match key_source {
        KeySource::StoredKey { public_key, secret_key } => {
            let signer = EventSigner::from_secret_bytes(secret_key)?;
            signer.sign_event(build_template(public_key.clone()))
        }
        KeySource::EphemeralKey => {
            let signer = EventSigner::generate();
            signer.sign_event(build_template(signer.public_key_hex()))
        }
        KeySource::ExternalSigner { public_key, sign_fn } => {
            let template = build_template(public_key.clone());
            let serialized = crate::canonical::canonical_serialization(&template)?;
            let digest = sha256(&serialized);
            let sig = sign_fn(&digest)?;
            Ok(Event {
                id: hex::encode(digest),
                pubkey: template.pubkey,
                created_at: template.created_at,
                kind: template.kind,
                tags: template.tags,
                content: template.content,
                sig: hex::encode(sig),
            })
        }
    }
}

/// Recompute an event's id from its fields and verify it matches `event.id`,
/// then verify the Schnorr signature over that id. Returns `Ok(true)` iff
/// both checks pass — this is the §8 invariant
/// `VerifySchnorr(pubkey, id, sig) == true` together with
/// `id == SHA256(canonical_serialization(event))`.
pub fn verify_event(event: &Event) -> Result<bool> {
    let template = EventTemplate {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    let serialized = crate::canonical::canonical_serialization(&template)?;
    let digest = sha256(&serialized);
    let computed_id = hex::encode(digest);
    if computed_id != event.id {
        return Ok(false);
    }

    let pubkey_bytes = hex::decode(&event.pubkey)?;
    let xonly = match XOnlyPublicKey::from_slice(&pubkey_bytes) {
        Ok(k) => k,
        Err(_) => return Ok(false),
    };
    let sig_bytes = hex::decode(&event.sig)?;
    let sig = match secp256k1::schnorr::Signature::from_slice(&sig_bytes) {
        Ok(s) => s,
        Err(_) => return Ok(false),
    };
    let msg = Message::from_digest(digest);
    let secp = Secp256k1::new();
    Ok(secp.verify_schnorr(&sig, &msg, &xonly).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventTemplate;

    #[test]
    fn round_trips_sign_and_verify() {
        let signer = EventSigner::generate();
        let template = EventTemplate {
            pubkey: signer.public_key_hex(),
            created_at: 1704164645,
            kind: 1,
            tags: vec![],
            content: "hi".into(),
        };
        let event = signer.sign_event(template).unwrap();
        assert!(verify_event(&event).unwrap());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let signer = EventSigner::generate();
        let template = EventTemplate {
            pubkey: signer.public_key_hex(),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: "original".into(),
        };
        let mut event = signer.sign_event(template).unwrap();
        event.content = "tampered".into();
        assert!(!verify_event(&event).unwrap());
    }

    #[test]
    fn from_secret_bytes_is_deterministic() {
        let secret = SecretBytes([7u8; 32]);
        let a = EventSigner::from_secret_bytes(&secret).unwrap();
        let b = EventSigner::from_secret_bytes(&secret).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn ephemeral_key_source_signs_with_the_pubkey_it_embeds() {
        let event = sign_with_key_source(&KeySource::EphemeralKey, |pubkey| EventTemplate {
            pubkey,
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: "hi".into(),
        })
        .unwrap();
        assert!(verify_event(&event).unwrap());
    }

    #[test]
    fn stored_key_source_signs_with_its_own_public_key() {
        let secret = SecretBytes([3u8; 32]);
        let signer = EventSigner::from_secret_bytes(&secret).unwrap();
        let key_source = KeySource::StoredKey {
            public_key: signer.public_key_hex(),
            secret_key: secret,
        };
        let event = sign_with_key_source(&key_source, |pubkey| EventTemplate {
            pubkey,
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(event.pubkey, signer.public_key_hex());
        assert!(verify_event(&event).unwrap());
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
