//! Scheduler Loop (C11), §4.11: single process-wide loop that polls the
//! Work Store, claims work by kind, and dispatches to the Post/Article/
//! Profile processors. Distinct claim kinds are drained in priority order
//! (Profile, Migration, Posts, Articles) before the tick sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use migrate_core::types::MigrationStatus;
use migrate_net::EmailNotifier;
use tracing::{info, warn};

use crate::article::ArticleProcessor;
use crate::claim::ClaimEngine;
use crate::post::PostProcessor;
use crate::profile::ProfileProcessor;
use crate::store::{Store, StoreError};

const QUEUE_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct SchedulerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: i64,
}

pub struct Scheduler {
    store: Arc<Store>,
    claim_engine: ClaimEngine,
    post_processor: PostProcessor,
    article_processor: ArticleProcessor,
    profile_processor: ProfileProcessor,
    email: Option<Arc<EmailNotifier>>,
    config: SchedulerConfig,
    last_queue_log: std::sync::Mutex<Instant>,
    last_cleanup: std::sync::Mutex<Instant>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        post_processor: PostProcessor,
        article_processor: ArticleProcessor,
        profile_processor: ProfileProcessor,
        email: Option<Arc<EmailNotifier>>,
        config: SchedulerConfig,
    ) -> Self {
        let claim_engine = ClaimEngine::new(Arc::clone(&store));
        let now = Instant::now();
        // Back-dated so the very first tick always runs housekeeping once.
        let last_cleanup = now
            .checked_sub(config.cleanup_interval)
            .unwrap_or(now);
        Self {
            store,
            claim_engine,
            post_processor,
            article_processor,
            profile_processor,
            email,
            config,
            last_queue_log: std::sync::Mutex::new(now - QUEUE_LOG_INTERVAL),
            last_cleanup: std::sync::Mutex::new(last_cleanup),
        }
    }

    /// Runs forever. Every exception inside a tick is logged and swallowed
    /// (§4.11: "the loop never exits").
    pub async fn run(&self) -> ! {
        loop {
            match self.tick().await {
                Ok(dispatched) => {
                    if !dispatched {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "scheduler tick failed, continuing");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Runs a single tick; returns whether any work was dispatched. Exposed
    /// separately from `run` so tests can drive individual ticks.
    pub async fn tick(&self) -> Result<bool, StoreError> {
        self.maybe_log_queue_depth()?;
        self.maybe_run_cleanup()?;

        let mut dispatched = false;

        if let Some(profile) = self.store.claim_profile()? {
            dispatched = true;
            let key_source = self.key_source_for(&profile.migration_id)?;
            self.profile_processor.process(&profile, &key_source).await;
        }

        if let Some(migration) = self.store.claim_migration()? {
            dispatched = true;
            info!(migration_id = %migration.id, "migration claimed");
        }

        let posts = self.store.claim_posts(self.config.concurrency)?;
        if !posts.is_empty() {
            dispatched = true;
            let futures = posts.iter().map(|post| async move {
                let key_source = match self.key_source_for(&post.migration_id) {
                    Ok(ks) => ks,
                    Err(err) => {
                        warn!(post_id = %post.id, error = %err, "failed to load migration key");
                        return;
                    }
                };
                self.post_processor.process(post, &key_source).await;
            });
            join_all(futures).await;
        }

        let articles = self.store.claim_articles(self.config.concurrency)?;
        if !articles.is_empty() {
            dispatched = true;
            let futures = articles.iter().map(|article| async move {
                let key_source = match self.key_source_for(&article.migration_id) {
                    Ok(ks) => ks,
                    Err(err) => {
                        warn!(article_id = %article.id, error = %err, "failed to load migration key");
                        return;
                    }
                };
                let (link, hashtags) = self.article_link_and_hashtags(article)?;
                self.article_processor.process(article, &key_source, &link, &hashtags).await;
                Ok::<(), StoreError>(())
            });
            for result in join_all(futures).await {
                if let Err(err) = result {
                    warn!(error = %err, "article dispatch failed");
                }
            }
        }

        self.sweep_completed_migrations()?;

        Ok(dispatched)
    }

    fn key_source_for(&self, migration_id: &str) -> Result<migrate_core::types::KeySource, StoreError> {
        let migration = self.store.get_migration(migration_id)?;
        let secret = self.store.get_migration_secret_key(migration_id)?;
        Ok(match secret {
            Some(bytes) => migrate_core::types::KeySource::StoredKey {
                public_key: migration.pubkey,
                secret_key: migrate_core::types::SecretBytes(bytes),
            },
            None => migrate_core::types::KeySource::EphemeralKey,
        })
    }

    fn article_link_and_hashtags(
        &self,
        article: &crate::store::ArticleRow,
    ) -> Result<(String, Vec<String>), StoreError> {
        Ok((article.link.clone(), article.hashtags.clone()))
    }

    /// §3: "A Migration becomes complete when every owned Post and Article
    /// is terminal; its secret key is then scrubbed." Checked once per tick
    /// against every Migration currently `processing`. A ready-to-claim
    /// email (C13) fires here, once, if the Migration has a notification
    /// address and the notifier is configured.
    fn sweep_completed_migrations(&self) -> Result<(), StoreError> {
        let processing = self.store.migrations_by_status(MigrationStatus::Processing)?;
        for migration in processing {
            if self.store.migration_children_are_terminal(&migration.id)? {
                self.store.complete_migration(&migration.id)?;
                info!(migration_id = %migration.id, "migration complete, secret key scrubbed");

                if let (Some(email_notifier), Some(to_email)) = (&self.email, &migration.email) {
                    let post_count = self.store.posts_for_migration(&migration.id)?.len() as u32;
                    let email_notifier = Arc::clone(email_notifier);
                    let to_email = to_email.clone();
                    let claim_token = migration.claim_token.clone();
                    let ig_handle = migration.ig_handle.clone();
                    tokio::spawn(async move {
                        email_notifier
                            .send_ready_email(&to_email, &claim_token, &ig_handle, post_count)
                            .await;
                    });
                }
            }
        }
        Ok(())
    }

    fn maybe_log_queue_depth(&self) -> Result<(), StoreError> {
        let mut last = self.last_queue_log.lock().unwrap();
        if last.elapsed() < QUEUE_LOG_INTERVAL {
            return Ok(());
        }
        *last = Instant::now();
        let depth = self.store.queue_depth()?;
        info!(
            pending_migrations = depth.pending_migrations,
            pending_posts = depth.pending_posts,
            pending_articles = depth.pending_articles,
            pending_profiles = depth.pending_profiles,
            "queue depth"
        );
        Ok(())
    }

    fn maybe_run_cleanup(&self) -> Result<(), StoreError> {
        let mut last = self.last_cleanup.lock().unwrap();
        if last.elapsed() < self.config.cleanup_interval {
            return Ok(());
        }
        *last = Instant::now();
        drop(last);

        if let Err(err) = self.claim_engine.recover_stale() {
            warn!(error = %err, "stale-recovery sweep failed");
        }

        let gc_count = self.store.gc_terminal_migrations(self.config.retention_days)?;
        if gc_count > 0 {
            info!(count = gc_count, "garbage-collected terminal migrations");
        }

        if let Some(used_pct) = disk_usage_percent(&self.store.database_dir()) {
            if used_pct >= 80 {
                warn!(used_pct, "disk usage at or above 80%");
            }
        }
        Ok(())
    }
}

/// §4.11's "emit a warning if disk usage ≥80%" check against the
/// filesystem backing `DATABASE_PATH`.
fn disk_usage_percent(path: &std::path::Path) -> Option<u64> {
    let total = fs2::total_space(path).ok()?;
    if total == 0 {
        return None;
    }
    let free = fs2::free_space(path).ok()?;
    let used = total.saturating_sub(free);
    Some((used.saturating_mul(100) / total) as u64)
}
