//! Monotonic clock abstraction providing the timing primitives required by
//! separation-time pacing and blocking reads.
use core::future::Future;
use embassy_time::{Duration, Instant};

/// Clock shared by reference between both device workers and API callers;
/// implementations must therefore work through `&self`.
pub trait LinkClock {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// Asynchronously wait for `duration`.
    fn delay<'a>(&'a self, duration: Duration) -> impl Future<Output = ()> + 'a;
}
