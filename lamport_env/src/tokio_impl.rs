//! Production implementation of NodeContext using Tokio.

use crate::NodeContext;
use async_trait::async_trait;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio timers and the system clock.
///
/// Randomness comes from a `ChaCha8Rng`, seeded from OS entropy by default
/// or from an explicit seed so a live run's decisions can be replayed.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Seed the RNG was created from
    seed: u64,

    /// RNG for tick-rate and action draws
    rng: Mutex<ChaCha8Rng>,
}

impl TokioContext {
    /// Creates a new TokioContext seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_seed(rand::rngs::OsRng.next_u64())
    }

    /// Creates a TokioContext with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn roll(&self, low: u32, high: u32) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        rng.gen_range(low..=high.max(low))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
