//! Typed error definitions for the cbx feed.
//!
//! [`FeedError`] is what sessions and the connection registry report to
//! callers. Variants carry rendered messages rather than source errors so the
//! same close reason can be fanned out to every listener of a shared
//! connection (the type is `Clone`). Application glue keeps using
//! `anyhow::Result` and converts at the edges.

use thiserror::Error;

/// Domain-specific errors for the cbx feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Transport failure: connect refused, abrupt close, server-side close
    /// after a rejected subscribe.
    #[error("connection error: {0}")]
    Connection(String),

    /// A bounded lifecycle phase (connecting, authenticating) ran out of time.
    #[error("timed out while {0}")]
    Timeout(String),

    /// WebSocket handshake or framing error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Frame or response parsing error.
    #[error("parse error: {0}")]
    Parse(String),

    /// REST request error.
    #[error("http error: {0}")]
    Http(String),

    /// The connection or session was closed by the local side.
    #[error("closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
