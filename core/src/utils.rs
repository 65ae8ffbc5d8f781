//! Shared time and id helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp in milliseconds since UNIX epoch.
#[inline]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a short unique id from the current time in nanoseconds and a
/// process-wide counter, so ids minted in the same nanosecond still differ.
#[inline]
pub fn gen_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}{:04x}", nanos, SEQ.fetch_add(1, Ordering::Relaxed) & 0xffff)
}
