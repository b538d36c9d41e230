//! Global request pacing for the synthesis service.
//!
//! Every process that talks to the service shares one quota, so request
//! starts are spaced by a minimum interval across all of them. The
//! coordination primitive is a [`ClockGate`]: an exclusive lock paired with
//! a shared "last request started at" timestamp. [`RateLimiter`] holds the
//! gate for the whole wait-then-record section, so concurrent callers
//! serialize and no two request starts land closer than the interval.

mod gate;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{TtsError, TtsResult};

pub use gate::{ClockGate, FileClockGate, GateGuard, MemoryClockGate, default_state_dir};

/// Source of wall-clock time in milliseconds since the Unix epoch.
///
/// Timestamps are compared across processes, so every participant must use
/// the same epoch.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Spaces request starts by at least `min_interval` across every holder of
/// the same gate.
#[derive(Clone)]
pub struct RateLimiter {
    gate: Arc<dyn ClockGate>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(gate: Arc<dyn ClockGate>, clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self {
            gate,
            clock,
            min_interval,
        }
    }

    /// Limiter on the wall clock.
    pub fn with_system_clock(gate: Arc<dyn ClockGate>, min_interval: Duration) -> Self {
        Self::new(gate, Arc::new(SystemClock), min_interval)
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may start, then record its start time.
    ///
    /// On `Ok` the caller owns the slot and must issue its request now. The
    /// gate is held while waiting out the remainder of the interval, so
    /// callers are admitted one at a time.
    ///
    /// # Errors
    ///
    /// [`TtsError::Cancelled`] if `cancel` fires first (no timestamp is
    /// recorded), or the gate's error if shared state is unavailable.
    pub async fn reserve_slot(&self, cancel: &CancellationToken) -> TtsResult<()> {
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TtsError::Cancelled),
            guard = self.gate.acquire() => guard?,
        };

        let interval_ms = u64::try_from(self.min_interval.as_millis()).unwrap_or(u64::MAX);
        let now = self.clock.now_ms();
        if let Some(last) = guard.last_request_ms()? {
            let elapsed = now.saturating_sub(last);
            if elapsed < interval_ms {
                let wait = Duration::from_millis(interval_ms - elapsed);
                debug!(wait_ms = wait.as_millis(), "Waiting for request slot");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(TtsError::Cancelled),
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }

        let started = self.clock.now_ms();
        guard.record_request(started)?;
        trace!(started, "Request slot reserved");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TokioClock;
    use super::*;
    use std::sync::Mutex;

    const INTERVAL: Duration = Duration::from_millis(6200);

    fn limiter(gate: &MemoryClockGate, clock: TokioClock) -> RateLimiter {
        RateLimiter::new(Arc::new(gate.clone()), Arc::new(clock), INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let gate = MemoryClockGate::new();
        let limiter = limiter(&gate, TokioClock::starting_at(1_000_000));
        let start = tokio::time::Instant::now();

        limiter.reserve_slot(&CancellationToken::new()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.last_request_ms().await, Some(1_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_requests_are_spaced() {
        let gate = MemoryClockGate::new();
        let limiter = limiter(&gate, TokioClock::starting_at(0));
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        limiter.reserve_slot(&cancel).await.unwrap();
        limiter.reserve_slot(&cancel).await.unwrap();
        limiter.reserve_slot(&cancel).await.unwrap();

        assert_eq!(start.elapsed(), INTERVAL * 2);
        assert_eq!(gate.last_request_ms().await, Some(12_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_only_for_remainder() {
        let gate = MemoryClockGate::with_last_request(10_000);
        let limiter = limiter(&gate, TokioClock::starting_at(14_000));
        let start = tokio::time::Instant::now();

        limiter.reserve_slot(&CancellationToken::new()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_serialize() {
        let gate = MemoryClockGate::new();
        let clock = TokioClock::starting_at(50_000);
        let started = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter(&gate, clock.clone());
                let clock = clock.clone();
                let started = Arc::clone(&started);
                tokio::spawn(async move {
                    limiter.reserve_slot(&CancellationToken::new()).await.unwrap();
                    started.lock().unwrap().push(clock.now_ms());
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut started = started.lock().unwrap().clone();
        started.sort_unstable();
        assert_eq!(started.len(), 4);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= 6200, "gap too small: {pair:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_records_nothing() {
        let gate = MemoryClockGate::with_last_request(0);
        let limiter = limiter(&gate, TokioClock::starting_at(100));
        let cancel = CancellationToken::new();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.reserve_slot(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(TtsError::Cancelled)));
        assert_eq!(gate.last_request_ms().await, Some(0));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_gate() {
        let gate = MemoryClockGate::new();
        let limiter = limiter(&gate, TokioClock::starting_at(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(limiter.reserve_slot(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(gate.last_request_ms().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_skew_never_waits_longer_than_interval() {
        // Last request stamped in the "future" by a process with a fast clock.
        let gate = MemoryClockGate::with_last_request(20_000);
        let mut clock = MockClock::new();
        clock.expect_now_ms().return_const(10_000u64);
        let limiter = RateLimiter::new(Arc::new(gate.clone()), Arc::new(clock), INTERVAL);
        let start = tokio::time::Instant::now();

        limiter.reserve_slot(&CancellationToken::new()).await.unwrap();

        assert_eq!(start.elapsed(), INTERVAL);
        assert_eq!(gate.last_request_ms().await, Some(10_000));
    }

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
