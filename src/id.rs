use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate a new record or chain identifier.
///
/// Identifiers are derived from the current time in nanoseconds and are
/// strictly increasing within a process, so two calls in the same clock tick
/// still return different values.
pub fn next_id() -> String {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n as u64)
        .unwrap_or_default();
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return format!("{:x}", candidate),
            Err(actual) => last = actual,
        }
    }
}
