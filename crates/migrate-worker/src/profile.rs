//! Profile Processor (C10), §4.10: uploads the avatar (best-effort), builds
//! and signs the kind-0 profile-metadata event, publishes, and marks the
//! Profile published.

use std::sync::Arc;

use migrate_core::crypto::sign_with_key_source;
use migrate_core::types::{EventTemplate, KeySource, ProfilePublished, KIND_PROFILE_METADATA};
use migrate_net::BlobClient;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{ProfileRow, Store, StoreError};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("signing failed: {0}")]
    Sign(#[from] migrate_core::error::Error),
    #[error("zero relays accepted the event")]
    NoRelayAccepted,
}

#[derive(Serialize)]
struct ProfileMetadataContent {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
}

pub struct ProfileProcessor {
    store: Arc<Store>,
    blob: Arc<BlobClient>,
    relays: Vec<String>,
    cache_url: Option<String>,
}

impl ProfileProcessor {
    pub fn new(store: Arc<Store>, blob: Arc<BlobClient>, relays: Vec<String>, cache_url: Option<String>) -> Self {
        Self { store, blob, relays, cache_url }
    }

    pub async fn process(&self, profile: &ProfileRow, key_source: &KeySource) {
        match self.try_process(profile, key_source).await {
            Ok(()) => info!(profile_id = %profile.id, "profile published"),
            Err(err) => {
                warn!(profile_id = %profile.id, error = %err, "profile processing failed");
                // Stale recovery (§4.7) flips `processing` back to
                // `unpublished` after the timeout; no immediate retry here.
            }
        }
    }

    async fn try_process(&self, profile: &ProfileRow, key_source: &KeySource) -> Result<(), ProfileError> {
        // §4.10 step 1: upload the avatar if present; on failure proceed
        // without a blob URL rather than failing the whole Profile.
        let picture_url = match &profile.avatar_url {
            Some(url) => match self.blob.upload_from_url(url, "image/jpeg", key_source, None).await {
                Ok(uploaded) => Some(uploaded.url),
                Err(err) => {
                    warn!(profile_id = %profile.id, error = %err, "avatar upload failed, continuing without it");
                    None
                }
            },
            None => None,
        };

        let content = serde_json::to_string(&ProfileMetadataContent {
            name: profile.display_name.clone().unwrap_or_default(),
            about: profile.bio.clone(),
            picture: picture_url.clone(),
        })
        .map_err(migrate_core::error::Error::from)?;

        let event = sign_with_key_source(key_source, |pubkey| EventTemplate {
            pubkey,
            created_at: chrono::Utc::now().timestamp(),
            kind: KIND_PROFILE_METADATA,
            tags: vec![],
            content,
        })?;

        let accepted = migrate_net::relay::publish(&event, &self.relays).await;
        if accepted.is_empty() {
            return Err(ProfileError::NoRelayAccepted);
        }

        if let Some(cache_url) = &self.cache_url {
            migrate_net::cache::import_events(cache_url, std::slice::from_ref(&event)).await;
        }

        self.store.set_profile_avatar(&profile.id, picture_url.as_deref())?;
        self.store.set_profile_published(&profile.id, ProfilePublished::Published)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_metadata_omits_absent_fields() {
        let content = ProfileMetadataContent {
            name: "alice".to_string(),
            about: None,
            picture: None,
        };
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, r#"{"name":"alice"}"#);
    }

    #[test]
    fn profile_metadata_includes_present_fields() {
        let content = ProfileMetadataContent {
            name: "alice".to_string(),
            about: Some("hi".to_string()),
            picture: Some("https://blob/x".to_string()),
        };
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, r#"{"name":"alice","about":"hi","picture":"https://blob/x"}"#);
    }
}
