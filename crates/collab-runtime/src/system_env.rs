//! Production `Environment` backed by the system clock.

use std::time::{Duration, Instant};

use collab_core::Environment;

/// Production environment using the monotonic system clock.
///
/// - `now()` is `std::time::Instant::now()`
/// - `sleep()` is `tokio::time::sleep()`, so it needs a running tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}
