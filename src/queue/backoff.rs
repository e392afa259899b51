//! Queue-level scheduled retry backoff (§4.C6): **exponential**, unlike the
//! linear in-pipeline OCC backoff in `occ::process_with_retry`. Don't
//! conflate the two.

use chrono::Duration;

/// `base * 2^min(retry_count, K)`, clamped to `max`. `K` is derived so the
/// exponent never overflows before the clamp kicks in.
pub fn next_retry_delay(base_secs: u64, max_secs: u64, retry_count: i32) -> Duration {
    let k = 32u32.min(retry_count.max(0) as u32);
    let factor = 1u64.checked_shl(k).unwrap_or(u64::MAX);
    let delay_secs = base_secs.saturating_mul(factor).min(max_secs);
    Duration::seconds(delay_secs as i64)
}
