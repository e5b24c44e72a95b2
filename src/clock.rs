use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock source anchored to the tokio timer.
///
/// Timestamps advance with `tokio::time`, so a paused runtime drives both the
/// poll loops and the persisted timestamps from the same source.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    /// Anchor the clock at the current wall time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor the clock at an explicit wall time
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall: wall,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }

    /// Time elapsed since `earlier`, zero if `earlier` lies in the future
    pub fn since(&self, earlier: DateTime<Utc>) -> Duration {
        (self.now() - earlier).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = Clock::new();
        let start = clock.now();

        tokio::time::advance(Duration::from_secs(90)).await;

        assert_eq!(clock.since(start), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_since_future_is_zero() {
        let clock = Clock::new();
        let future = clock.now() + chrono::Duration::seconds(30);
        assert_eq!(clock.since(future), Duration::ZERO);
    }
}
