//! Cooperative yielding for long segmentation runs.
//!
//! The pacer suspends the task after a batch of work or a wall-clock slice,
//! whichever comes first. Yield points never change a segmentation decision.

use std::time::Duration;

use chronicle_types::config::PacingConfig;
use tokio::time::Instant;

/// Counts units of work and yields to the scheduler periodically.
#[derive(Debug)]
pub struct Pacer {
    batch_size: usize,
    time_slice: Duration,
    since_yield: usize,
    last_yield: Instant,
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            time_slice: Duration::from_millis(config.time_slice_ms),
            since_yield: 0,
            last_yield: Instant::now(),
        }
    }

    /// Record one unit of work, yielding if the batch or time slice is used up.
    ///
    /// Returns `true` when the task yielded.
    pub async fn tick(&mut self) -> bool {
        self.since_yield += 1;
        if self.since_yield < self.batch_size && self.last_yield.elapsed() < self.time_slice {
            return false;
        }

        tokio::task::yield_now().await;
        self.since_yield = 0;
        self.last_yield = Instant::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yields_every_batch() {
        let mut pacer = Pacer::new(&PacingConfig {
            batch_size: 3,
            time_slice_ms: 60_000,
        });

        let yields: Vec<bool> = {
            let mut out = Vec::new();
            for _ in 0..7 {
                out.push(pacer.tick().await);
            }
            out
        };
        assert_eq!(yields, vec![false, false, true, false, false, true, false]);
    }

    #[tokio::test]
    async fn test_zero_time_slice_yields_every_tick() {
        let mut pacer = Pacer::new(&PacingConfig {
            batch_size: 1_000,
            time_slice_ms: 0,
        });
        assert!(pacer.tick().await);
        assert!(pacer.tick().await);
    }

    #[tokio::test]
    async fn test_zero_batch_is_treated_as_one() {
        let mut pacer = Pacer::new(&PacingConfig {
            batch_size: 0,
            time_slice_ms: 60_000,
        });
        assert!(pacer.tick().await);
    }
}
