//! # cbx-core
//!
//! Core crate for the cbx market-data feed, providing:
//!
//! - **Types** (`types`) — granularities, sides, decoded feed events, candles
//! - **Configuration** (`config`) — JSON config deserialization + credentials
//! - **Error types** (`error`) — domain-specific `FeedError` via thiserror
//! - **Retry policy** (`retry`) — exponential backoff with jitter
//! - **WebSocket** (`ws`) — transport seam + shared connection registry
//! - **Time utilities** (`time_util`) — wall-clock timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::FeedError;
pub use types::*;
