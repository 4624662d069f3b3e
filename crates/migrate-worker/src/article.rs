//! Article Processor (C9), §4.9: header + inline image upload, Markdown
//! rewrite, slug derivation, kind-30023 publication.

use std::sync::Arc;

use migrate_core::crypto::sign_with_key_source;
use migrate_core::types::{ArticleStatus, EventTemplate, KeySource, KIND_LONG_FORM};
use migrate_net::BlobClient;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{ArticleRow, Store, StoreError};

#[derive(Debug, Error)]
pub enum ArticleError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("signing failed: {0}")]
    Sign(#[from] migrate_core::error::Error),
    #[error("zero relays accepted the event")]
    NoRelayAccepted,
    #[error("one or more images failed to upload")]
    ImageUploadFailed,
}

pub struct ArticleProcessor {
    store: Arc<Store>,
    blob: Arc<BlobClient>,
    relays: Vec<String>,
    cache_url: Option<String>,
    max_upload_attempts: u32,
}

impl ArticleProcessor {
    pub fn new(
        store: Arc<Store>,
        blob: Arc<BlobClient>,
        relays: Vec<String>,
        cache_url: Option<String>,
        max_upload_attempts: u32,
    ) -> Self {
        Self { store, blob, relays, cache_url, max_upload_attempts }
    }

    pub async fn process(&self, article: &ArticleRow, key_source: &KeySource, link: &str, hashtags: &[String]) {
        let attempts = match self.store.increment_article_upload_attempts(&article.id) {
            Ok(n) => n,
            Err(err) => {
                warn!(article_id = %article.id, error = %err, "failed to record upload attempt");
                return;
            }
        };
        let last_attempt = attempts >= self.max_upload_attempts;

        match self.try_process(article, key_source, link, hashtags, last_attempt).await {
            Ok(published_with_fallback) => {
                if published_with_fallback {
                    if let Err(store_err) = self.store.set_article_status(&article.id, ArticleStatus::Ready) {
                        warn!(article_id = %article.id, error = %store_err, "failed to record fallback status");
                    }
                    info!(article_id = %article.id, "article published with CDN fallback images");
                } else {
                    info!(article_id = %article.id, "article published");
                }
            }
            Err(err) => {
                warn!(article_id = %article.id, error = %err, "article upload step failed");
                if let Err(store_err) = self.store.set_article_status(&article.id, ArticleStatus::Pending) {
                    warn!(article_id = %article.id, error = %store_err, "failed to record article status");
                }
            }
        }
    }

    /// Returns `Ok(true)` when the event published using one or more
    /// CDN-fallback image URLs because an upload kept failing through the
    /// final attempt (§4.9's "ready with CDN fallback" rule), `Ok(false)`
    /// for a clean publish.
    async fn try_process(
        &self,
        article: &ArticleRow,
        key_source: &KeySource,
        link: &str,
        hashtags: &[String],
        last_attempt: bool,
    ) -> Result<bool, ArticleError> {
        self.store.set_article_status(&article.id, ArticleStatus::Processing)?;

        let mut header_url = article.blossom_image_url.clone();
        let mut any_image_failed = false;
        if header_url.is_none() {
            if let Some(url) = &article.header_image_url {
                if is_already_blob(url) {
                    header_url = Some(url.clone());
                } else {
                    match self.blob.upload_from_url(url, "image/jpeg", key_source, None).await {
                        Ok(uploaded) => header_url = Some(uploaded.url),
                        Err(err) => {
                            warn!(article_id = %article.id, error = %err, "header upload failed");
                            any_image_failed = true;
                        }
                    }
                }
            }
        }

        // `article.markdown` already carries the rewrites from any prior
        // attempt, so `extract` only turns up URLs that still need uploading
        // (already-rewritten blob URLs are skipped by `is_already_blob`).
        let inline_urls = migrate_net::markdown::extract(&article.markdown);
        let mut inline_map = article.inline_image_urls.clone();
        for url in inline_urls {
            if is_already_blob(&url) || url.starts_with("data:") || inline_map.contains_key(&url) {
                continue;
            }
            match self.blob.upload_from_url(&url, "image/jpeg", key_source, None).await {
                Ok(uploaded) => {
                    inline_map.insert(url, uploaded.url);
                }
                Err(err) => {
                    warn!(article_id = %article.id, url, error = %err, "inline image upload failed");
                    any_image_failed = true;
                }
            }
        }

        let rewritten = migrate_net::markdown::rewrite(&article.markdown, &inline_map);
        self.store.persist_article_progress(
            &article.id,
            &rewritten,
            header_url.as_deref(),
            &inline_map,
        )?;

        if any_image_failed && !last_attempt {
            return Err(ArticleError::ImageUploadFailed);
        }

        let slug = migrate_net::slug::derive_slug(link);
        let mut tags = vec![vec!["d".to_string(), slug], vec!["title".to_string(), article.title.clone()]];
        if let Some(summary) = &article.summary {
            tags.push(vec!["summary".to_string(), summary.clone()]);
        }
        if let Some(url) = &header_url {
            tags.push(vec!["image".to_string(), url.clone()]);
        }
        if let Some(published_at) = article.published_at {
            tags.push(vec!["published_at".to_string(), published_at.to_string()]);
        }
        for tag in hashtags {
            tags.push(vec!["t".to_string(), tag.clone()]);
        }

        let event = sign_with_key_source(key_source, |pubkey| EventTemplate {
            pubkey,
            created_at: chrono::Utc::now().timestamp(),
            kind: KIND_LONG_FORM,
            tags,
            content: rewritten,
        })?;

        let accepted = migrate_net::relay::publish(&event, &self.relays).await;
        if accepted.is_empty() {
            return Err(ArticleError::NoRelayAccepted);
        }

        if let Some(cache_url) = &self.cache_url {
            migrate_net::cache::import_events(cache_url, std::slice::from_ref(&event)).await;
        }

        self.store.set_article_published(&article.id, &event.id)?;
        Ok(any_image_failed)
    }
}

fn is_already_blob(url: &str) -> bool {
    url.contains("/blob/") || url.starts_with("https://blossom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_blob_and_data_uri_sources_as_already_hosted() {
        assert!(is_already_blob("https://blossom.primal.net/abc"));
        assert!(!is_already_blob("https://cdn.instagram.com/x.jpg"));
    }
}
