//! Timer abstraction for the time-based operators.
//!
//! Every operator that waits takes its timer as a value rather than reaching
//! for a global clock, so a test can drive it from tokio's paused clock or
//! from a timer of its own.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// A source of sleeps.
pub trait Timer: Clone + Send + Sync + fmt::Debug + 'static {
    /// Future returned by [`sleep`](Timer::sleep)
    type Sleep: Future<Output = ()> + Send + 'static;

    /// Resolve once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Self::Sleep;
}

/// Timer backed by `tokio::time`. Honors `tokio::time::pause`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    type Sleep = tokio::time::Sleep;

    fn sleep(&self, duration: Duration) -> Self::Sleep {
        tokio::time::sleep(duration)
    }
}
