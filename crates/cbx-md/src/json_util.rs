//! Shared JSON field helpers for the feed decoder.

/// Parse a JSON value (string or number) as `f64`.
///
/// The feed encodes prices and sizes as strings (`"30000.5"`); numbers are
/// accepted too.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_u64()
    }
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// Parse an RFC 3339 timestamp field into microseconds since epoch.
pub fn parse_time_us(v: Option<&serde_json::Value>) -> Option<i64> {
    let s = v?.as_str()?;
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_micros())
}

/// Parse a `[price, size]` level array.
pub fn parse_level(v: &serde_json::Value) -> Option<(f64, f64)> {
    let arr = v.as_array()?;
    Some((parse_str_f64(arr.first())?, parse_str_f64(arr.get(1))?))
}
