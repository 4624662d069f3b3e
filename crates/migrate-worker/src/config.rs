//! Configuration (C12): environment/CLI-driven, fails fast on missing
//! required collaborators per §6 ("Missing BLOSSOM_SERVER or NOSTR_RELAYS
//! is fatal at startup").

use clap::Parser;
use std::path::PathBuf;

/// migrate-worker - asynchronous migration pipeline daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "migrate-worker")]
#[command(about = "Migrates social-media content to Blossom + Nostr relays")]
pub struct Config {
    /// Content-addressed blob store, e.g. https://blossom.primal.net
    #[arg(long, env = "BLOSSOM_SERVER", default_value = "")]
    pub blossom_server: String,

    /// Comma-separated relay WebSocket URLs
    #[arg(long, env = "NOSTR_RELAYS", value_delimiter = ',', default_value = "")]
    pub nostr_relays: Vec<String>,

    /// Optional single cache endpoint for bulk import (C4)
    #[arg(long, env = "PRIMAL_CACHE_URL")]
    pub primal_cache_url: Option<String>,

    /// Max Posts claimed and processed in parallel per scheduler tick
    #[arg(long, env = "CONCURRENCY", default_value = "3")]
    pub concurrency: usize,

    /// Max Post retries before marking error
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Max Article upload attempts before publishing with CDN fallbacks
    #[arg(long, env = "MAX_UPLOAD_ATTEMPTS", default_value = "5")]
    pub max_upload_attempts: u32,

    /// Seconds to sleep when a scheduler tick dispatches no work
    #[arg(long, env = "POLL_INTERVAL", default_value = "5")]
    pub poll_interval_secs: u64,

    /// Seconds between stale-recovery + GC housekeeping sweeps
    #[arg(long, env = "CLEANUP_INTERVAL", default_value = "3600")]
    pub cleanup_interval_secs: u64,

    /// Days a terminal Migration is retained before garbage collection
    #[arg(long, env = "RETENTION_DAYS", default_value = "7")]
    pub retention_days: i64,

    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "./data/migrate.db")]
    pub database_path: PathBuf,

    /// Backend URL for the (external) platform fetcher / streaming uploader
    #[arg(long, env = "BACKEND_URL", default_value = "http://localhost:8000")]
    pub backend_url: String,

    /// Public base URL, used to build claim links in notification emails
    #[arg(long, env = "BASE_URL", default_value = "https://ownyourposts.com")]
    pub base_url: String,

    /// Resend API key for the Email Notifier; empty disables it
    #[arg(long, env = "RESEND_API_KEY", default_value = "")]
    pub resend_api_key: String,
}

impl Config {
    /// Fail fast on missing required external collaborators (§6).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.blossom_server.is_empty() {
            anyhow::bail!("BLOSSOM_SERVER is required");
        }
        if self.nostr_relays.is_empty() || self.nostr_relays.iter().all(|r| r.is_empty()) {
            anyhow::bail!("NOSTR_RELAYS is required (comma-separated list)");
        }
        if self.concurrency == 0 {
            anyhow::bail!("CONCURRENCY must be at least 1");
        }
        Ok(())
    }

    pub fn relays(&self) -> Vec<String> {
        self.nostr_relays.iter().filter(|r| !r.is_empty()).cloned().collect()
    }
}
