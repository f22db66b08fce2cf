//! # cbx-api
//!
//! Exchange API access for the cbx feed:
//!
//! - [`signer`] — HMAC-SHA256 request signing (prehash + base64 secret)
//! - [`subscribe`] — signed WebSocket subscribe payloads
//! - [`history`] — REST candle history used to seed live series
//!
//! Signing never fails: missing or malformed credentials produce a
//! well-formed signature that the server will reject, because
//! unauthenticated access to public channels is a supported mode.

pub mod history;
pub mod signer;
pub mod subscribe;

pub use history::HistoryClient;
pub use signer::{SignedRequest, Signer};
pub use subscribe::{SubscribeMessage, SubscriptionBuilder};
