//! Time source for keep-alive and idle tracking.

use std::time::Instant;

/// Monotonic time source.
///
/// The client reads time only through this trait, so keep-alive behavior
/// can be driven by a simulated clock.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
