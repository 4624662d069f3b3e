//! Claim Engine (C7), §4.7: stale-recovery sweep across all four work
//! kinds. The atomic claim primitive itself lives on [`crate::store::Store`]
//! (one conditional `UPDATE ... WHERE status = 'pending'` per kind); this
//! module is the periodic housekeeping half.

use std::sync::Arc;

use tracing::{info, warn};

use crate::store::{Store, StoreError};

const MIGRATION_STALE_MINUTES: i64 = 30;
const ARTICLE_STALE_MINUTES: i64 = 15;
const PROFILE_STALE_MINUTES: i64 = 10;

pub struct ClaimEngine {
    store: Arc<Store>,
}

impl ClaimEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Resets rows stuck `processing`/`uploading` past their kind-specific
    /// timeout back to `pending` so a future worker can reclaim them
    /// (§4.7, §8 scenario 6). Child Posts reset whenever their parent
    /// Migration resets; Articles and Profiles each recover on their own
    /// timeout since they aren't gated behind a Migration claim.
    pub fn recover_stale(&self) -> Result<(), StoreError> {
        let stale_migrations = self.store.recover_stale_migrations(MIGRATION_STALE_MINUTES)?;
        for migration_id in &stale_migrations {
            self.store.reset_posts_for_migration(migration_id)?;
        }
        if !stale_migrations.is_empty() {
            warn!(count = stale_migrations.len(), "reset stale migrations to pending");
        }

        let reset_articles = self.store.recover_stale_articles(ARTICLE_STALE_MINUTES)?;
        if reset_articles > 0 {
            warn!(count = reset_articles, "reset stale articles to pending");
        }

        let reset_profiles = self.store.recover_stale_profiles(PROFILE_STALE_MINUTES)?;
        if reset_profiles > 0 {
            warn!(count = reset_profiles, "reset stale profiles to unpublished");
        }

        info!(
            reset_migrations = stale_migrations.len(),
            reset_articles,
            reset_profiles,
            "stale-recovery sweep complete"
        );
        Ok(())
    }
}
