//! Core environment context trait for simulated nodes.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for environment interaction.
///
/// Abstracts the "real world" away from the node event loop so the same loop
/// runs against the wall clock or against a virtual clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `ChaCha8Rng`
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Every random draw a node makes (its tick rate and each tick's action)
/// goes through [`NodeContext::roll`], so seeding the context makes a run
/// reproducible.
#[async_trait]
pub trait NodeContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Run deadlines are measured against this value.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for event log timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Draws a uniform integer in `[low, high]` (inclusive).
    ///
    /// Implementations treat `high < low` as `[low, low]`.
    fn roll(&self, low: u32, high: u32) -> u32;

    /// Returns the context's seed (for logging/debugging).
    fn seed(&self) -> u64;

    /// Wall-clock timestamp in nanoseconds since the UNIX epoch.
    fn timestamp_nanos(&self) -> u128 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }
}
