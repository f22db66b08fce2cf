//! Market data structures — decoded feed events and candles.
//!
//! # Timestamp convention
//!
//! Event times (`time_us`) are **microseconds since Unix epoch**, parsed from
//! the exchange's RFC 3339 strings. Candle bucket times (`Candle::time`) are
//! **seconds**, aligned to the granularity width.

use serde::{Deserialize, Serialize};

use super::enums::Side;
use crate::time_util;

// ---------------------------------------------------------------------------
// Level 2
// ---------------------------------------------------------------------------

/// One `[price, size]` book level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Full order-book snapshot, sent once per product after subscribing to
/// `level2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub product_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// One `[side, price, size]` book change. A `size` of zero removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2Change {
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// Incremental order-book update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Update {
    pub product_id: String,
    pub time_us: i64,
    pub changes: Vec<L2Change>,
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// An executed trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub trade_id: u64,
    pub sequence: u64,
    pub maker_order_id: String,
    pub taker_order_id: String,
    pub time_us: i64,
    pub product_id: String,
    pub size: f64,
    pub price: f64,
    /// Side of the maker order.
    pub side: Side,
}

impl Match {
    /// Event time truncated to whole seconds.
    #[inline]
    pub fn time_secs(&self) -> i64 {
        self.time_us.div_euclid(1_000_000)
    }
}

// ---------------------------------------------------------------------------
// MarketEvent — tagged union of recognized frames
// ---------------------------------------------------------------------------

/// A decoded, recognized feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Snapshot(Snapshot),
    L2Update(L2Update),
    Match(Match),
}

impl MarketEvent {
    /// Product the frame belongs to.
    pub fn product_id(&self) -> &str {
        match self {
            Self::Snapshot(s) => &s.product_id,
            Self::L2Update(u) => &u.product_id,
            Self::Match(m) => &m.product_id,
        }
    }

    /// Wire `type` tag of the frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::L2Update(_) => "l2update",
            Self::Match(_) => "match",
        }
    }
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// OHLCV summary of the trades in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, seconds since epoch, aligned to the bucket width.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A fresh candle opened by a single trade.
    pub fn opened_by(time: i64, price: f64, size: f64) -> Self {
        Self { time, open: price, high: price, low: price, close: price, volume: size }
    }

    /// Fold one more trade of the same bucket into this candle.
    #[inline]
    pub fn absorb(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }

    /// Convert a REST candle row `[time, low, high, open, close, volume]`.
    pub fn from_rest_row(row: [f64; 6]) -> Self {
        let [time, low, high, open, close, volume] = row;
        Self { time: time as i64, open, high, low, close, volume }
    }

    /// Re-align `time` to a bucket boundary of `width` seconds.
    pub fn aligned(mut self, width: i64) -> Self {
        self.time = time_util::bucket_start(self.time, width);
        self
    }
}
