//! Network-facing components of the migration pipeline: the Blob Client
//! (C2), Relay Publisher (C3), Cache Importer (C4), Markdown Image
//! Rewriter (C5), slug derivation, and the Email Notifier collaborator
//! (C13).

pub mod blob;
pub mod cache;
pub mod email;
pub mod markdown;
pub mod relay;
pub mod slug;

pub use blob::{BlobClient, BlobError, YtdlResolver};
pub use email::EmailNotifier;
