//! Cache Importer (C4): best-effort bulk ingest into a single cache relay.
//!
//! Per §4.4/§9, the import protocol is non-standard and site-specific;
//! failures are logged and never propagated as fatal — the event is
//! already durable on at least one relay by the time this runs.

use futures_util::{SinkExt, StreamExt};
use migrate_core::types::Event;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::warn;

const IMPORT_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn import_events(cache_url: &str, events: &[Event]) -> bool {
    match import_events_inner(cache_url, events).await {
        Ok(()) => true,
        Err(err) => {
            warn!(cache_url, error = %err, "cache import failed (advisory only)");
            false
        }
    }
}

async fn import_events_inner(
    cache_url: &str,
    events: &[Event],
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws, _) = tokio::time::timeout(
        IMPORT_TIMEOUT,
        tokio_tungstenite::connect_async(cache_url),
    )
    .await??;

    let sub_id = "import";
    let req = serde_json::json!([
        "REQ",
        sub_id,
        { "cache": ["import_events", { "events": events }] }
    ]);
    ws.send(WsMessage::Text(serde_json::to_string(&req)?)).await?;

    let _ = tokio::time::timeout(IMPORT_TIMEOUT, ws.next()).await;

    let close = serde_json::json!(["CLOSE", sub_id]);
    ws.send(WsMessage::Text(serde_json::to_string(&close)?)).await?;
    Ok(())
}
