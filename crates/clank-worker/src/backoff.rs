//! Delay before a failed job is attempted again.

use std::time::Duration;

const BASE_DELAY_MS: u64 = 15_000;
const MAX_DELAY_MS: u64 = 600_000;

/// Exponential back-off with ±25 % jitter, capped at 10 minutes.
///
/// `attempt` is the number of attempts already made (1 after the first
/// failure).
///
/// | Attempt | Delay                    |
/// |---------|--------------------------|
/// | 1       | 15 s × 2⁰ ± 25 % jitter  |
/// | 2       | 15 s × 2¹ ± 25 % jitter  |
/// | 3       | 15 s × 2² ± 25 % jitter  |
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let computed = BASE_DELAY_MS.saturating_mul(1u64 << exponent);
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(delay_ms)
}
