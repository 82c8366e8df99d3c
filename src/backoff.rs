//! Inter-attempt delay formulas for the retry loop.
//!
//! Three distinct schedules: the generic exponential backoff, a much larger
//! cool-down after a blocked classification, and a moderate delay after a
//! request timeout. The blocked and generic formulas intentionally stay
//! separate even though their jitter ranges overlap.

use std::time::Duration;

use rand::Rng;

/// Base delay of the exponential schedule, in milliseconds.
pub const BASE_DELAY_MS: u64 = 1000;
/// Growth factor of the exponential schedule.
pub const GROWTH_FACTOR: f64 = 1.5;
/// Cap on the deterministic component, in milliseconds.
pub const MAX_BASE_DELAY_MS: u64 = 10_000;

/// Generic retry delay: `min(1000 * 1.5^attempt, 10000) + U[500, 2000)` ms.
pub fn retry_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = deterministic_delay(attempt);
    Duration::from_millis(base + rng.gen_range(500..2000))
}

/// Cool-down after an IP-block signal: `5000 + attempt*2000 + U[1000, 5000)` ms.
pub fn blocked_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = 5000 + u64::from(attempt) * 2000;
    Duration::from_millis(base + rng.gen_range(1000..5000))
}

/// Delay after a request timeout: `2000 + attempt*1000 + U[500, 2000)` ms.
pub fn timeout_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = 2000 + u64::from(attempt) * 1000;
    Duration::from_millis(base + rng.gen_range(500..2000))
}

/// Deterministic component of the generic schedule.
pub fn deterministic_delay(attempt: u32) -> u64 {
    let raw = (BASE_DELAY_MS as f64) * GROWTH_FACTOR.powi(attempt as i32);
    (raw as u64).min(MAX_BASE_DELAY_MS)
}
