//! Backoff schedules for transient durable-log errors.
//!
//! Built on `backon`: callers take the delays from the builder's
//! [`Backoff`](backon::Backoff) iterator and stop retrying once it is
//! exhausted.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Ceiling for a single back-off delay, before jitter.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff with jitter: starts at `base`, doubles up to
/// [`MAX_RETRY_DELAY`], and yields at most `retries` delays.
pub fn transient_backoff(base: Duration, retries: u32) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(base)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(retries as usize)
        .with_jitter()
}

/// A schedule without retries: the first failure is final.
pub fn no_retry() -> ExponentialBuilder {
    ExponentialBuilder::default().with_max_times(0)
}
