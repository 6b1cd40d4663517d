//! Shared clock helpers.
//!
//! Two clocks, never mixed: wall-clock UTC for timestamps that land in
//! records (receipts, audit entries, state), monotonic `Instant`s for
//! circuit-breaker timing and duration measurement at the call sites
//! that need them.

use chrono::Utc;
use ulid::Ulid;

/// Current UTC time as an RFC 3339 string, e.g. `2026-08-01T12:34:56.789012Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Current wall-clock time as fractional unix-epoch seconds.
///
/// Used by the retry queue, whose `next_retry_at` values are absolute
/// wall times that must survive a restart.
pub fn now_epoch() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Unique id for one dispatch trace (receipt delivery ids, event ids).
pub fn new_delivery_id() -> String {
    Ulid::new().to_string()
}
