use std::time::Duration;

/// Exponent cap for gateway retries (base * 2^6).
const MAX_RETRY_EXPONENT: u32 = 6;

/// Returns the delay before retry number `attempt` (zero based).
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.pow(attempt.min(MAX_RETRY_EXPONENT)))
}
