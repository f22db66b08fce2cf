//! # cbx-md
//!
//! Market data for the cbx feed: frame decoding, the per-product session
//! lifecycle, reconnection supervision and candle aggregation.
//!
//! ## Architecture
//!
//! ```text
//! CandleFeed ──► Subscription ──► StreamSession ──► ConnectionRegistry (cbx-core)
//!     │               │ retry          │ decode_frame
//!     ▼               ▼                ▼
//! CandleAggregator  FeedEvent      MarketEvent
//! ```
//!
//! - [`session`] — one IDLE → CONNECTING → AUTHENTICATING → STREAMING → CLOSED pass
//! - [`subscription`] — retries sessions under a [`RetryPolicy`](cbx_core::retry::RetryPolicy)
//! - [`candles`] — incremental OHLCV buckets
//! - [`pipeline`] — subscription + aggregator wiring
//! - [`json_parser`] / [`json_util`] — frame decoding

pub mod candles;
pub mod event;
pub mod json_parser;
pub mod json_util;
pub mod pipeline;
pub mod session;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use candles::{CandleAggregator, CandleUpdate};
pub use event::{FeedEvent, FeedEventReceiver, FeedEventSender};
pub use json_parser::{DecodedFrame, decode_frame};
pub use pipeline::{CandleFeed, CandleUpdateReceiver};
pub use session::{SessionEnd, SessionSettings, SessionState, StreamSession};
pub use subscription::Subscription;
