//! Integration tests for request pacing across independent "processes".
//!
//! Each simulated process owns its own `RateLimiter` and its own gate
//! instance; they share only what real processes would share (a cloned
//! in-memory gate, or a directory on disk). Every timestamp the limiters
//! record is captured, and consecutive accepted starts must be at least the
//! minimum interval apart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use recap_voice::rate_limit::{Clock, ClockGate, GateGuard};
use recap_voice::{FileClockGate, MemoryClockGate, RateLimiter, SystemClock, TtsResult};
use tokio_util::sync::CancellationToken;

/// Gate wrapper that logs every recorded request start.
struct RecordingGate<G> {
    inner: G,
    starts: Arc<Mutex<Vec<u64>>>,
}

struct RecordingGuard {
    inner: Box<dyn GateGuard>,
    starts: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl<G: ClockGate> ClockGate for RecordingGate<G> {
    async fn acquire(&self) -> TtsResult<Box<dyn GateGuard>> {
        let inner = self.inner.acquire().await?;
        Ok(Box::new(RecordingGuard {
            inner,
            starts: Arc::clone(&self.starts),
        }))
    }
}

impl GateGuard for RecordingGuard {
    fn last_request_ms(&self) -> TtsResult<Option<u64>> {
        self.inner.last_request_ms()
    }

    fn record_request(&mut self, at_ms: u64) -> TtsResult<()> {
        self.inner.record_request(at_ms)?;
        self.starts.lock().unwrap().push(at_ms);
        Ok(())
    }
}

/// Millisecond clock on tokio's pausable time.
struct PausedClock {
    origin: tokio::time::Instant,
}

impl Clock for PausedClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap()
    }
}

fn assert_spaced(starts: &[u64], interval: Duration) {
    let mut starts = starts.to_vec();
    starts.sort_unstable();
    let min = u64::try_from(interval.as_millis()).unwrap();
    for pair in starts.windows(2) {
        assert!(
            pair[1] - pair[0] >= min,
            "requests at {} and {} are closer than {min} ms",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_processes_sharing_memory_gate_are_spaced() {
    let shared = MemoryClockGate::new();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = tokio::time::Instant::now();
    let interval = Duration::from_millis(6200);

    let processes: Vec<_> = (0..3)
        .map(|_| {
            let gate = RecordingGate {
                inner: shared.clone(),
                starts: Arc::clone(&starts),
            };
            let limiter = RateLimiter::new(Arc::new(gate), Arc::new(PausedClock { origin }), interval);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                for _ in 0..4 {
                    limiter.reserve_slot(&cancel).await.unwrap();
                }
            })
        })
        .collect();
    for process in processes {
        process.await.unwrap();
    }

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 12);
    assert_spaced(&starts, interval);
    // Twelve back-to-back requests take eleven intervals.
    assert_eq!(origin.elapsed(), interval * 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processes_sharing_state_dir_are_spaced() {
    let dir = tempfile::tempdir().unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let interval = Duration::from_millis(120);

    let processes: Vec<_> = (0..3)
        .map(|_| {
            let gate = RecordingGate {
                inner: FileClockGate::new(dir.path()).with_poll_interval(Duration::from_millis(2)),
                starts: Arc::clone(&starts),
            };
            let limiter = RateLimiter::with_system_clock(Arc::new(gate), interval);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                for _ in 0..3 {
                    limiter.reserve_slot(&cancel).await.unwrap();
                }
            })
        })
        .collect();
    for process in processes {
        tokio::time::timeout(Duration::from_secs(30), process)
            .await
            .unwrap()
            .unwrap();
    }

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 9);
    assert_spaced(&starts, interval);
    assert!(!dir.path().join("rate_limit.lock").exists());
}

#[tokio::test]
async fn test_file_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let interval = Duration::from_millis(150);
    let cancel = CancellationToken::new();

    let first = RateLimiter::with_system_clock(Arc::new(FileClockGate::new(dir.path())), interval);
    first.reserve_slot(&cancel).await.unwrap();
    drop(first);

    // A fresh limiter (new "process") must still honor the recorded start.
    let started = std::time::Instant::now();
    let second = RateLimiter::new(
        Arc::new(FileClockGate::new(dir.path())),
        Arc::new(SystemClock),
        interval,
    );
    second.reserve_slot(&cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_consume_a_slot() {
    let shared = MemoryClockGate::new();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = tokio::time::Instant::now();
    let interval = Duration::from_millis(6200);
    let limiter = |gate: &MemoryClockGate| {
        RateLimiter::new(
            Arc::new(RecordingGate {
                inner: gate.clone(),
                starts: Arc::clone(&starts),
            }),
            Arc::new(PausedClock { origin }),
            interval,
        )
    };

    let a = limiter(&shared);
    let b = limiter(&shared);
    a.reserve_slot(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let cancel = cancel.clone();
        tokio::spawn(async move { b.reserve_slot(&cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();
    assert!(waiter.await.unwrap().unwrap_err().is_cancelled());

    a.reserve_slot(&CancellationToken::new()).await.unwrap();
    assert_eq!(*starts.lock().unwrap(), vec![0, 6200]);
}
