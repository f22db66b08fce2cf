//! Events delivered to a subscriber.
//!
//! A [`Subscription`](crate::subscription::Subscription) hands its caller a
//! [`FeedEventReceiver`]. Market events arrive in the order the server sent
//! them; lifecycle events are interleaved where they happen. The channel
//! closes once the subscription stops for good.

use std::time::Duration;

use cbx_core::{FeedError, MarketEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A decoded frame for the subscribed product.
    Market(MarketEvent),

    /// The session is attached to an open connection.
    Connected {
        /// Registry id of the shared connection.
        connection_id: u64,
        /// Whether this session opened the connection.
        owner: bool,
    },

    /// The session closed on its own.
    Disconnected {
        reason: FeedError,
    },

    /// A new session will be started after `delay`.
    Reconnecting {
        /// Consecutive retry number, starting at 1.
        attempt: u32,
        delay: Duration,
    },
}

/// Sender half of the feed event channel.
pub type FeedEventSender = tokio::sync::mpsc::UnboundedSender<FeedEvent>;

/// Receiver half of the feed event channel.
pub type FeedEventReceiver = tokio::sync::mpsc::UnboundedReceiver<FeedEvent>;
