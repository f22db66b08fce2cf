//! Enumerations used throughout the feed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Order / trade side as reported by the exchange (`"buy"` / `"sell"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the wire representation. Anything else is `None`.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Candle bucket width. Only the widths the exchange's candle endpoint
/// accepts are representable.
///
/// Serialized as the width in seconds (`60`, `300`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Granularity {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 1 hour
    H1,
    /// 6 hours
    H6,
    /// 1 day
    D1,
}

impl Granularity {
    /// All supported granularities, narrowest first.
    pub const ALL: [Granularity; 6] = [Self::M1, Self::M5, Self::M15, Self::H1, Self::H6, Self::D1];

    /// Bucket width in seconds.
    pub fn as_secs(self) -> u32 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H6 => 21_600,
            Self::D1 => 86_400,
        }
    }

    /// Short label (`"1m"`, `"1h"`, ...).
    pub fn label(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H6 => "6h",
            Self::D1 => "1d",
        }
    }

    /// How far back to seed history from REST for this width.
    ///
    /// Each window stays under the 300-candle cap of the candle endpoint.
    pub fn seed_lookback(self) -> Duration {
        const HOUR: u64 = 3_600;
        const DAY: u64 = 86_400;
        Duration::from_secs(match self {
            Self::M1 => 5 * HOUR,
            Self::M5 => 25 * HOUR,
            Self::M15 => 75 * HOUR,
            Self::H1 => 300 * HOUR,
            Self::H6 => 75 * DAY,
            Self::D1 => 300 * DAY,
        })
    }

    /// Parse a label such as `"15m"`.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.label() == label)
    }
}

impl TryFrom<u32> for Granularity {
    type Error = String;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_secs() == secs)
            .ok_or_else(|| format!("unsupported granularity {secs}s (expected one of 60, 300, 900, 3600, 21600, 86400)"))
    }
}

impl From<Granularity> for u32 {
    fn from(g: Granularity) -> Self {
        g.as_secs()
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    /// Accepts either a label (`"5m"`) or a width in seconds (`"300"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(g) = Self::from_label(s) {
            return Ok(g);
        }
        let secs: u32 = s.parse().map_err(|_| format!("invalid granularity: {s}"))?;
        Self::try_from(secs)
    }
}
