//! Exponential cooldown growth with jitter, for breakers that keep failing
//! their half-open trial.

use rand::Rng;
use std::time::Duration;

/// Cooldown for the given reopen count.
///
/// `reopens == 0` is the first trip and uses `base_ms` as is. Every failed
/// trial doubles the previous cooldown, plus up to 10% jitter, never past `max_ms`.
pub fn calculate_cooldown(reopens: u32, base_ms: u64, max_ms: u64) -> Duration {
    if reopens == 0 {
        return Duration::from_millis(base_ms);
    }

    let exponential_base = 2u64.saturating_pow(reopens);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms.max(base_ms));

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis((capped_delay + jitter).min(max_ms.max(base_ms)))
}
