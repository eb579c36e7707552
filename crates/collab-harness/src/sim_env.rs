//! Virtual clock.

use std::{
    cell::Cell,
    ops::{Add, Sub},
    rc::Rc,
    time::Duration,
};

use collab_core::Environment;

/// Point on the simulated clock, as time since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(pub Duration);

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Environment whose clock only moves when told to.
///
/// Clones share the same clock.
#[derive(Debug, Clone, Default)]
pub struct SimEnv {
    now: Rc<Cell<Duration>>,
}

impl SimEnv {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.now.get())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> {
        self.advance(duration);
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_clock() {
        let env = SimEnv::new();
        let other = env.clone();
        env.advance(Duration::from_millis(250));
        assert_eq!(other.now(), SimInstant(Duration::from_millis(250)));
    }

    #[test]
    fn instants_subtract_saturating() {
        let early = SimInstant(Duration::from_secs(1));
        let late = SimInstant(Duration::from_secs(3));
        assert_eq!(late - early, Duration::from_secs(2));
        assert_eq!(early - late, Duration::ZERO);
    }
}
