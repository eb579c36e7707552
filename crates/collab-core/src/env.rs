//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from the system clock.
//! Production code uses real time and tokio timers; the simulation harness
//! substitutes a virtual clock that only moves when a test advances it.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Abstract environment providing time and async sleeping.
///
/// The associated `Instant` lets a simulated clock stand in for
/// `std::time::Instant`, which cannot be constructed at arbitrary points.
pub trait Environment: Clone + 'static {
    /// Point in time on this environment's clock.
    type Instant: Copy
        + Ord
        + Debug
        + Add<Duration, Output = Self::Instant>
        + Sub<Output = Duration>;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this. State machines never sleep; they report
    /// a deadline and wait to be ticked.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()>;
}
