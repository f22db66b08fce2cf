//! Shared fixtures for the session, subscription and pipeline tests.

use std::sync::Arc;
use std::time::Duration;

use cbx_api::{Signer, SubscriptionBuilder};
use cbx_core::config::Credential;
use cbx_core::ws::{ConnectionRegistry, MemoryConnector};
use tokio::sync::{mpsc, watch};

use crate::event::FeedEvent;
use crate::session::{SessionSettings, SessionState};

pub const URL: &str = "wss://feed.test/ws";

pub const SUBSCRIPTIONS_ACK: &str =
    r#"{"type":"subscriptions","channels":[{"name":"level2","product_ids":["BTC-USD"]}]}"#;

pub fn memory_registry(connector: &MemoryConnector) -> ConnectionRegistry {
    ConnectionRegistry::new(Arc::new(connector.clone()), Duration::from_secs(5))
}

pub fn anonymous_builder() -> SubscriptionBuilder {
    SubscriptionBuilder::new(Signer::new(Arc::new(Credential::default())))
}

pub fn settings(product: &str) -> SessionSettings {
    SessionSettings::new(URL, product)
}

/// A `match` frame at `secs` seconds past the epoch.
pub fn match_frame(product: &str, trade_id: u64, secs: i64) -> String {
    let time = chrono::DateTime::from_timestamp(secs, 0).unwrap().to_rfc3339();
    serde_json::json!({
        "type": "match",
        "trade_id": trade_id,
        "sequence": trade_id,
        "maker_order_id": "maker",
        "taker_order_id": "taker",
        "time": time,
        "product_id": product,
        "size": "1.0",
        "price": "100.0",
        "side": "buy"
    })
    .to_string()
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub async fn wait_state(state: &mut watch::Receiver<SessionState>, want: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}
