//! Core data model for the migration pipeline.
//!
//! These types mirror the row shapes persisted by the Work Store
//! (`migrate-worker::store`) and the wire shape of a Nostr event. Field
//! order on `Event` matters: it is exactly the order hashed by
//! [`crate::canonical`].

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// 32-byte x-only secp256k1 public key, hex-encoded on the wire.
pub type XOnlyPubkeyHex = String;

/// A 32-byte secret key. Zeroized on drop; never `Debug`-printed in full.
#[derive(Clone, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretBytes(pub [u8; 32]);

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

/// The sentinel a Migration's `secret_key` column is replaced with once the
/// Migration reaches a terminal state. Never a valid secp256k1 scalar.
pub const SCRUBBED_SECRET_SENTINEL: &str = "scrubbed";

// =============================================================================
// KEY SOURCE
// =============================================================================

/// Capability abstraction replacing the three ad-hoc key-derivation paths of
/// the original system (persistent row key, ephemeral proposal key,
/// deterministic external key). Processors depend on this, never on storage
/// columns.
#[derive(Clone)]
pub enum KeySource {
    /// Secret key lives in the Work Store row.
    StoredKey {
        public_key: XOnlyPubkeyHex,
        secret_key: SecretBytes,
    },
    /// Generate a fresh keypair for the lifetime of one operation.
    EphemeralKey,
    /// Signing is delegated to an external signer; only the public key is
    /// known locally.
    ExternalSigner {
        public_key: XOnlyPubkeyHex,
        sign_fn: std::sync::Arc<
            dyn Fn(&[u8; 32]) -> Result<[u8; 64], crate::error::Error> + Send + Sync,
        >,
    },
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::StoredKey { public_key, .. } => {
                f.debug_struct("StoredKey").field("public_key", public_key).finish()
            }
            KeySource::EphemeralKey => write!(f, "EphemeralKey"),
            KeySource::ExternalSigner { public_key, .. } => {
                f.debug_struct("ExternalSigner").field("public_key", public_key).finish()
            }
        }
    }
}

// =============================================================================
// STATUS ENUMS
// =============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Processing,
    Ready,
    Complete,
    Error,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Uploading,
    Ready,
    Publishing,
    Complete,
    Error,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Reel,
    Image,
    Carousel,
    Text,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Pending,
    Processing,
    Ready,
    Publishing,
    Complete,
    Error,
}

/// `unpublished(0)`, `processing(-1)`, `published(1)` per §3.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(i8)]
pub enum ProfilePublished {
    Processing = -1,
    Unpublished = 0,
    Published = 1,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

// =============================================================================
// MEDIA ITEM
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub source_url: String,
    pub media_type: MediaType,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub thumbnail_url: Option<String>,
}

// =============================================================================
// POST
// =============================================================================

#[derive(Clone, Debug)]
pub struct Post {
    pub id: String,
    pub migration_id: String,
    pub post_type: PostType,
    pub media_items: Vec<MediaItem>,
    pub caption: Option<String>,
    pub original_date: Option<String>,
    pub status: PostStatus,
    pub blossom_urls: Vec<String>,
    pub nostr_event_id: Option<String>,
    pub retry_count: u32,
}

// =============================================================================
// ARTICLE
// =============================================================================

#[derive(Clone, Debug)]
pub struct Article {
    pub id: String,
    pub migration_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub content_markdown: String,
    pub image_url: Option<String>,
    pub blossom_image_url: Option<String>,
    pub inline_image_urls: std::collections::BTreeMap<String, String>,
    pub hashtags: Vec<String>,
    pub published_at: Option<String>,
    pub link: String,
    pub status: ArticleStatus,
    pub upload_attempts: u32,
}

// =============================================================================
// PROFILE (per-migration singleton)
// =============================================================================

#[derive(Clone, Debug)]
pub struct Profile {
    pub migration_id: String,
    pub name: String,
    pub bio: Option<String>,
    pub picture_source_url: Option<String>,
    pub picture_blob_url: Option<String>,
    pub published: ProfilePublished,
}

// =============================================================================
// EVENT (transient; not persisted in structural form)
// =============================================================================

/// A signed Nostr event, exactly as broadcast to relays.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Unsigned event fields, the input to [`crate::canonical::canonical_serialization`].
#[derive(Clone, Debug)]
pub struct EventTemplate {
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

pub const KIND_SHORT_NOTE: u32 = 1;
pub const KIND_PROFILE_METADATA: u32 = 0;
pub const KIND_LONG_FORM: u32 = 30023;
pub const KIND_BLOSSOM_AUTH: u32 = 24242;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResult {
    pub url: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
}
