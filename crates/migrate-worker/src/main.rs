//! migrate-worker - Instagram-to-Nostr/Blossom migration pipeline daemon
//!
//! Polls the Work Store for claimable Migrations, Posts, Articles and
//! Profiles, uploads media to a Blossom server, and publishes the
//! corresponding Nostr events to a configured relay set.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use migrate_net::{BlobClient, EmailNotifier};
use migrate_worker::{
    ArticleProcessor, Config, PostProcessor, ProfileProcessor, Scheduler, SchedulerConfig, Store,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("migrate_worker=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(err) = config.validate() {
        error!("invalid configuration: {}", err);
        return ExitCode::FAILURE;
    }

    info!(
        "migrate-worker v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = match Store::open(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("failed to open work store: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let blob = Arc::new(BlobClient::new(config.blossom_server.clone()));
    let relays = config.relays();
    let cache_url = config.primal_cache_url.clone();
    let email = EmailNotifier::new(config.resend_api_key.clone(), config.base_url.clone()).map(Arc::new);

    let post_processor = PostProcessor::new(
        Arc::clone(&store),
        Arc::clone(&blob),
        relays.clone(),
        cache_url.clone(),
        config.max_retries,
    );
    let article_processor = ArticleProcessor::new(
        Arc::clone(&store),
        Arc::clone(&blob),
        relays.clone(),
        cache_url.clone(),
        config.max_upload_attempts,
    );
    let profile_processor = ProfileProcessor::new(Arc::clone(&store), Arc::clone(&blob), relays, cache_url);

    let scheduler_config = SchedulerConfig {
        concurrency: config.concurrency,
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
        retention_days: config.retention_days,
    };

    let scheduler = Scheduler::new(
        store,
        post_processor,
        article_processor,
        profile_processor,
        email,
        scheduler_config,
    );

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
    });

    scheduler.run().await
}
