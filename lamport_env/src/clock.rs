//! Lamport logical clock.

use serde::Serialize;

/// A node's Lamport clock.
///
/// The only mutation path is [`LogicalClock::advance`]: after observing a
/// value `v` the clock becomes `max(clock, v + 1)`. Local events (sends and
/// internal actions) observe the clock's own value, which always moves it
/// forward by exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LogicalClock(u64);

impl LogicalClock {
    /// Creates a clock at zero.
    pub fn new() -> Self {
        Self(0)
    }

    /// Creates a clock at an arbitrary starting value.
    pub fn starting_at(value: u64) -> Self {
        Self(value)
    }

    /// Returns the current clock value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Applies the Lamport update rule for an observed timestamp and returns
    /// the new value. The result is always strictly greater than `observed`
    /// unless the counter is saturated.
    pub fn advance(&mut self, observed: u64) -> u64 {
        self.0 = self.0.max(observed.saturating_add(1));
        self.0
    }

    /// Local event: equivalent to `advance(self.value())`.
    pub fn tick(&mut self) -> u64 {
        self.advance(self.0)
    }
}

impl std::fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
