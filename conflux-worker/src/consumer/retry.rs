use std::time::Duration;

/// Delay before re-running a job that has failed `attempts` times
///
/// Doubles from `base` with each attempt and never exceeds `max`.
pub fn retry_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}
