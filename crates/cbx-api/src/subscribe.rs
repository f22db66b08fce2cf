//! Signed subscribe payloads for the WebSocket feed.
//!
//! One signature over `GET /users/self/verify` proves identity for every
//! channel in the message. Channel order is part of the protocol: `level2`
//! always precedes `matches`.

use serde::Serialize;

use crate::signer::Signer;

/// Path signed to authenticate a feed subscription.
pub const VERIFY_PATH: &str = "/users/self/verify";

/// Feed channels this crate subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    Level2,
    Matches,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: ChannelName,
    pub product_ids: Vec<String>,
}

/// The `subscribe` frame.
///
/// Absent `key`/`passphrase` are left out of the JSON entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub channels: Vec<Channel>,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    pub timestamp: u64,
}

impl SubscribeMessage {
    /// Render the frame text.
    pub fn to_json(&self) -> String {
        // A struct of strings, integers and vectors always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Builds subscribe frames for products.
#[derive(Debug, Clone)]
pub struct SubscriptionBuilder {
    signer: Signer,
}

impl SubscriptionBuilder {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    /// Subscribe `symbol` to `level2` then `matches`, signed now.
    pub fn build_subscribe(&self, symbol: &str) -> SubscribeMessage {
        self.assemble(symbol, self.signer.sign(VERIFY_PATH, "GET", None))
    }

    /// Same as [`build_subscribe`](Self::build_subscribe) at a fixed timestamp.
    pub fn build_subscribe_at(&self, symbol: &str, timestamp: u64) -> SubscribeMessage {
        self.assemble(symbol, self.signer.sign_at(timestamp, VERIFY_PATH, "GET", None))
    }

    fn assemble(&self, symbol: &str, signed: crate::signer::SignedRequest) -> SubscribeMessage {
        let credential = self.signer.credential();
        SubscribeMessage {
            kind: "subscribe",
            channels: vec![
                Channel { name: ChannelName::Level2, product_ids: vec![symbol.to_owned()] },
                Channel { name: ChannelName::Matches, product_ids: vec![symbol.to_owned()] },
            ],
            signature: signed.signature,
            key: credential.api_key.clone(),
            passphrase: credential.passphrase.clone(),
            timestamp: signed.timestamp,
        }
    }
}
