//! Relay Publisher (C3): WebSocket fan-out with per-relay OK acknowledgment.

use futures_util::{SinkExt, StreamExt};
use migrate_core::types::Event;
use std::collections::HashSet;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// `publish(event, relays) -> set of relays that accepted it` (§4.3).
/// All relays are contacted in parallel; returns once every per-relay
/// future resolves (accept, reject, or timeout).
pub async fn publish(event: &Event, relays: &[String]) -> HashSet<String> {
    let futures = relays.iter().map(|relay| publish_one(event, relay));
    let results = futures_util::future::join_all(futures).await;

    relays
        .iter()
        .cloned()
        .zip(results)
        .filter_map(|(relay, accepted)| accepted.then_some(relay))
        .collect()
}

async fn publish_one(event: &Event, relay_url: &str) -> bool {
    match publish_one_inner(event, relay_url).await {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(relay = relay_url, error = %err, "relay publish failed");
            false
        }
    }
}

async fn publish_one_inner(
    event: &Event,
    relay_url: &str,
) -> std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws, _) = tokio::time::timeout(
        PUBLISH_TIMEOUT,
        tokio_tungstenite::connect_async(relay_url),
    )
    .await??;

    let payload = serde_json::to_string(&serde_json::json!(["EVENT", event]))?;
    ws.send(WsMessage::Text(payload)).await?;

    let accepted = tokio::time::timeout(PUBLISH_TIMEOUT, ws.next())
        .await
        .ok()
        .flatten()
        .and_then(|frame| frame.ok())
        .and_then(|frame| match frame {
            WsMessage::Text(text) => serde_json::from_str::<serde_json::Value>(&text).ok(),
            _ => None,
        })
        .and_then(|value| parse_ok_frame(&value, &event.id))
        .unwrap_or(false);

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
    debug!(relay = relay_url, accepted, "relay publish result");
    Ok(accepted)
}

fn parse_ok_frame(value: &serde_json::Value, expected_id: &str) -> Option<bool> {
    let arr = value.as_array()?;
    if arr.first()?.as_str()? != "OK" {
        return None;
    }
    if arr.get(1)?.as_str()? != expected_id {
        return None;
    }
    arr.get(2)?.as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accepted_ok_frame() {
        let value = serde_json::json!(["OK", "abc", true, ""]);
        assert_eq!(parse_ok_frame(&value, "abc"), Some(true));
    }

    #[test]
    fn rejects_mismatched_event_id() {
        let value = serde_json::json!(["OK", "other", true, ""]);
        assert_eq!(parse_ok_frame(&value, "abc"), None);
    }

    #[test]
    fn rejects_non_ok_frame() {
        let value = serde_json::json!(["NOTICE", "hello"]);
        assert_eq!(parse_ok_frame(&value, "abc"), None);
    }
}
