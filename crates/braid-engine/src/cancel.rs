use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Scheduled cancellation probe.
///
/// Cancellation is cooperative: the client raises a flag on the assistant
/// message and the orchestrator polls it. This wrapper bounds the poll to
/// once per period no matter how fast tokens arrive, and swapping it for a
/// push-based channel would not change the orchestrator's contract. The
/// trade-off is cancellation latency of up to one period (~1s by default).
pub struct CancelPoller {
    interval: Interval,
}

impl CancelPoller {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

    pub fn new(period: Duration) -> Self {
        // First check only after one full period; a generation cannot be
        // cancelled before the client has even seen it start.
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Resolves when the next check is due. Cancel-safe; pending ticks are
    /// coalesced.
    pub async fn due(&mut self) {
        self.interval.tick().await;
    }
}

impl Default for CancelPoller {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_check_waits_a_full_period() {
        let mut poller = CancelPoller::new(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        poller.due().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_are_spaced_by_period() {
        let mut poller = CancelPoller::new(Duration::from_secs(1));
        poller.due().await;
        let after_first = tokio::time::Instant::now();
        poller.due().await;
        assert!(after_first.elapsed() >= Duration::from_secs(1));
    }
}
