//! Blob Client (C2): content-addressed upload to a Blossom-protocol server.

use base64::Engine;
use migrate_core::crypto::{sign_with_key_source, sha256_hex};
use migrate_core::types::{EventTemplate, KeySource, UploadResult, KIND_BLOSSOM_AUTH};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const EXTERNAL_RESOLVER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("upload failed: status {status} body {body}")]
    UploadFailed { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("signing error: {0}")]
    Signing(#[from] migrate_core::error::Error),

    #[error("ytdl resolver failed for {0}")]
    ResolverFailed(String),
}

pub type Result<T> = std::result::Result<T, BlobError>;

#[derive(Deserialize, Default)]
struct UploadResponseBody {
    url: Option<String>,
}

pub struct BlobClient {
    http: reqwest::Client,
    server: String,
}

impl BlobClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: server.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build and sign the kind-24242 authorization envelope for one upload,
    /// per §4.2 / §6. Returns the `"Nostr " + base64(event_json)` header
    /// value.
    fn build_auth_header(&self, key_source: &KeySource, hash: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let event = sign_with_key_source(key_source, |pubkey| EventTemplate {
            pubkey,
            created_at: now,
            kind: KIND_BLOSSOM_AUTH,
            tags: vec![
                vec!["t".into(), "upload".into()],
                vec!["x".into(), hash.into()],
                vec!["expiration".into(), (now + 300).to_string()],
            ],
            content: "Upload to Blossom".into(),
        })?;
        let json = serde_json::to_vec(&event).map_err(migrate_core::error::Error::from)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(format!("Nostr {encoded}"))
    }

    /// Upload raw bytes, building the authorization envelope internally.
    pub async fn upload(
        &self,
        media_bytes: &[u8],
        mime_type: &str,
        key_source: &KeySource,
    ) -> Result<UploadResult> {
        let hash = sha256_hex(media_bytes);
        let auth_header = self.build_auth_header(key_source, &hash)?;

        let response = self
            .http
            .put(format!("{}/upload", self.server))
            .header("Authorization", auth_header)
            .header("Content-Type", mime_type)
            .header("X-SHA-256", &hash)
            .body(media_bytes.to_vec())
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        self.finish_upload(response, &hash, media_bytes.len() as u64, mime_type)
            .await
    }

    /// Streaming variant (§4.2): fetch `source_url` (resolving a `ytdl:`
    /// prefix first if present), hash while downloading, then upload.
    pub async fn upload_from_url(
        &self,
        source_url: &str,
        mime_type: &str,
        key_source: &KeySource,
        resolver: Option<&YtdlResolver>,
    ) -> Result<UploadResult> {
        let fetch_url = if let Some(stripped) = source_url.strip_prefix("ytdl:") {
            let resolver = resolver.ok_or_else(|| BlobError::ResolverFailed(source_url.into()))?;
            resolver.resolve(stripped).await?
        } else {
            source_url.to_string()
        };

        let bytes = self
            .http
            .get(&fetch_url)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        self.upload(&bytes, mime_type, key_source).await
    }

    async fn finish_upload(
        &self,
        response: reqwest::Response,
        hash: &str,
        size: u64,
        mime_type: &str,
    ) -> Result<UploadResult> {
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::UploadFailed {
                status: status.as_u16(),
                body,
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        let url = serde_json::from_str::<UploadResponseBody>(&body_text)
            .ok()
            .and_then(|b| b.url)
            .unwrap_or_else(|| format!("{}/{}", self.server, hash));

        Ok(UploadResult {
            url,
            hash: hash.to_string(),
            size,
            mime_type: mime_type.to_string(),
        })
    }
}

/// External YTDL resolver collaborator (§6): `ytdl:<url> -> direct_url`.
pub struct YtdlResolver {
    http: reqwest::Client,
    resolver_url: String,
}

impl YtdlResolver {
    pub fn new(resolver_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver_url: resolver_url.into(),
        }
    }

    pub async fn resolve(&self, source: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct ResolveResponse {
            direct_url: String,
        }
        let resp: ResolveResponse = self
            .http
            .get(&self.resolver_url)
            .query(&[("url", source)])
            .timeout(EXTERNAL_RESOLVER_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.direct_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash_from_server() {
        let client = BlobClient::new("https://blossom.example/");
        assert_eq!(client.server, "https://blossom.example");
    }

    #[test]
    fn ephemeral_auth_header_event_is_self_consistent() {
        let client = BlobClient::new("https://blossom.example");
        let header = client
            .build_auth_header(&KeySource::EphemeralKey, "deadbeef")
            .unwrap();
        let encoded = header.strip_prefix("Nostr ").unwrap();
        let json = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let event: migrate_core::types::Event = serde_json::from_slice(&json).unwrap();
        assert!(migrate_core::crypto::verify_event(&event).unwrap());
    }
}
