//! Post Processor (C8), §4.8: uploads a Post's MediaItems in parallel,
//! builds and signs a kind-1 event, publishes, and persists the result.

use std::sync::Arc;

use chrono::DateTime;
use futures_util::future::join_all;
use migrate_core::crypto::sign_with_key_source;
use migrate_core::types::{EventTemplate, KeySource, PostStatus, KIND_SHORT_NOTE};
use migrate_net::BlobClient;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{MediaItemRow, PostRow, Store, StoreError};

#[derive(Debug, Error)]
pub enum PostError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("media upload failed: {0}")]
    Upload(#[from] migrate_net::BlobError),
    #[error("signing failed: {0}")]
    Sign(#[from] migrate_core::error::Error),
    #[error("zero relays accepted the event")]
    NoRelayAccepted,
}

pub struct PostProcessor {
    store: Arc<Store>,
    blob: Arc<BlobClient>,
    relays: Vec<String>,
    cache_url: Option<String>,
    max_retries: u32,
}

impl PostProcessor {
    pub fn new(
        store: Arc<Store>,
        blob: Arc<BlobClient>,
        relays: Vec<String>,
        cache_url: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self { store, blob, relays, cache_url, max_retries }
    }

    pub async fn process(&self, post: &PostRow, key_source: &KeySource) {
        match self.try_process(post, key_source).await {
            Ok(()) => {
                info!(post_id = %post.id, "post published");
            }
            Err(err) => {
                warn!(post_id = %post.id, error = %err, "post processing failed");
                if let Err(store_err) = self.handle_failure(post) {
                    error!(post_id = %post.id, error = %store_err, "failed to record post failure");
                }
            }
        }
    }

    fn handle_failure(&self, post: &PostRow) -> Result<(), StoreError> {
        let retries = self.store.increment_post_retry(&post.id)?;
        if retries >= self.max_retries {
            // A terminal `error` Post must not carry a full set of uploaded
            // URLs (§8: `len(blossom_urls) == len(media_items)` iff
            // `status == complete`) even though every upload may have
            // already succeeded before the relay-publish step failed.
            self.store.clear_media_item_uploaded_urls(&post.id)?;
            self.store.set_post_status(&post.id, PostStatus::Error)?;
        } else {
            self.store.set_post_status(&post.id, PostStatus::Pending)?;
        }
        Ok(())
    }

    async fn try_process(&self, post: &PostRow, key_source: &KeySource) -> Result<(), PostError> {
        self.store.set_post_status(&post.id, PostStatus::Uploading)?;

        let media_items = self.store.media_items_for_post(&post.id)?;
        let uploads = self.upload_all(&media_items, key_source).await?;

        let caption = post.caption.clone().unwrap_or_default();
        let created_at = parse_original_date(post.original_date.as_deref());
        let tags = build_imeta_tags(&media_items, &uploads);
        let content = build_content(&caption, &uploads);

        let event = sign_with_key_source(key_source, |pubkey| EventTemplate {
            pubkey,
            created_at,
            kind: KIND_SHORT_NOTE,
            tags,
            content,
        })?;

        self.store.set_post_status(&post.id, PostStatus::Publishing)?;
        for (item, upload) in media_items.iter().zip(uploads.iter()) {
            self.store.set_media_item_uploaded_url(&item.id, &upload.url)?;
        }

        let accepted = migrate_net::relay::publish(&event, &self.relays).await;
        if accepted.is_empty() {
            return Err(PostError::NoRelayAccepted);
        }

        if let Some(cache_url) = &self.cache_url {
            migrate_net::cache::import_events(cache_url, std::slice::from_ref(&event)).await;
        }

        self.store.set_post_published(&post.id, &event.id)?;
        Ok(())
    }

    async fn upload_all(
        &self,
        media_items: &[MediaItemRow],
        key_source: &KeySource,
    ) -> Result<Vec<migrate_core::types::UploadResult>, PostError> {
        let futures = media_items.iter().map(|item| {
            let blob = Arc::clone(&self.blob);
            let mime_type = mime_for(item.media_type);
            let source_url = item.source_url.clone();
            let key_source = key_source.clone();
            async move { blob.upload_from_url(&source_url, mime_type, &key_source, None).await }
        });

        let results = join_all(futures).await;
        let mut uploads = Vec::with_capacity(results.len());
        for result in results {
            uploads.push(result?);
        }
        Ok(uploads)
    }
}

fn mime_for(media_type: migrate_core::types::MediaType) -> &'static str {
    match media_type {
        migrate_core::types::MediaType::Image => "image/jpeg",
        migrate_core::types::MediaType::Video => "video/mp4",
    }
}

fn parse_original_date(original_date: Option<&str>) -> i64 {
    original_date
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
}

fn build_imeta_tags(
    media_items: &[MediaItemRow],
    uploads: &[migrate_core::types::UploadResult],
) -> Vec<Vec<String>> {
    media_items
        .iter()
        .zip(uploads.iter())
        .map(|(item, upload)| {
            let mut tag = vec![
                "imeta".to_string(),
                format!("url {}", upload.url),
                format!("x {}", upload.hash),
                format!("m {}", upload.mime_type),
                format!("size {}", upload.size),
            ];
            if let (Some(w), Some(h)) = (item.width, item.height) {
                tag.push(format!("dim {w}x{h}"));
            }
            tag
        })
        .collect()
}

fn build_content(caption: &str, uploads: &[migrate_core::types::UploadResult]) -> String {
    let missing: Vec<&str> = uploads
        .iter()
        .map(|u| u.url.as_str())
        .filter(|url| !caption.contains(url))
        .collect();

    if missing.is_empty() {
        caption.to_string()
    } else if caption.is_empty() {
        missing.join("\n")
    } else {
        format!("{}\n\n{}", caption, missing.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_core::types::UploadResult;

    fn upload(url: &str) -> UploadResult {
        UploadResult {
            url: url.to_string(),
            hash: "deadbeef".to_string(),
            size: 1024,
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn appends_urls_not_already_in_caption() {
        let uploads = vec![upload("https://blob/a"), upload("https://blob/b")];
        let content = build_content("hello world", &uploads);
        assert_eq!(content, "hello world\n\nhttps://blob/a\nhttps://blob/b");
    }

    #[test]
    fn skips_urls_already_present_in_caption() {
        let uploads = vec![upload("https://blob/a")];
        let content = build_content("see https://blob/a", &uploads);
        assert_eq!(content, "see https://blob/a");
    }

    #[test]
    fn empty_caption_uses_urls_only() {
        let uploads = vec![upload("https://blob/a")];
        assert_eq!(build_content("", &uploads), "https://blob/a");
    }

    fn media_item(id: &str, width: Option<u32>, height: Option<u32>) -> MediaItemRow {
        MediaItemRow {
            id: id.to_string(),
            post_id: "p1".to_string(),
            source_url: format!("https://ig/{id}"),
            media_type: migrate_core::types::MediaType::Image,
            order_index: 0,
            uploaded_url: None,
            width,
            height,
        }
    }

    #[test]
    fn imeta_tags_preserve_input_order() {
        let items = vec![media_item("a", None, None), media_item("b", None, None)];
        let uploads = vec![upload("https://blob/a"), upload("https://blob/b")];
        let tags = build_imeta_tags(&items, &uploads);
        assert_eq!(tags.len(), 2);
        assert!(tags[0][1].contains("blob/a"));
        assert!(tags[1][1].contains("blob/b"));
    }

    #[test]
    fn imeta_tags_include_dim_when_known() {
        let items = vec![media_item("a", Some(1080), Some(1920))];
        let uploads = vec![upload("https://blob/a")];
        let tags = build_imeta_tags(&items, &uploads);
        assert_eq!(tags[0].last().unwrap(), "dim 1080x1920");
    }

    #[test]
    fn imeta_tags_omit_dim_when_unknown() {
        let items = vec![media_item("a", None, None)];
        let uploads = vec![upload("https://blob/a")];
        let tags = build_imeta_tags(&items, &uploads);
        assert_eq!(tags[0].len(), 5);
    }
}
