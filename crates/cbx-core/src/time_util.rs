//! Wall-clock time utilities.

use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
fn since_epoch() -> std::time::Duration {
    // A clock set before 1970 reads as the epoch rather than failing.
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Current time as whole **seconds** since Unix epoch (truncated).
#[inline]
pub fn now_secs() -> u64 {
    since_epoch().as_secs()
}

/// Floor a timestamp in seconds to the start of its `width`-second bucket.
///
/// Uses Euclidean division so pre-epoch timestamps still floor downwards.
#[inline]
pub fn bucket_start(secs: i64, width: i64) -> i64 {
    secs.div_euclid(width) * width
}
