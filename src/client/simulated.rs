//! Synthetic executor for load simulation.
//!
//! Sleeps for a fixed latency, optionally fails every n-th call, and records
//! what an admission policy let through: dispatch instants and the peak
//! number of overlapping calls.

use crate::client::Executor;
use async_trait::async_trait;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Failure injected by [`SimulatedExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("simulated failure on call {call}")]
pub struct SimulatedFailure {
    /// 1-based index of the failing call
    pub call: u64,
}

/// Executor that pretends to be a chat endpoint.
///
/// Requests are opaque ids and are echoed back on success.
#[derive(Debug)]
pub struct SimulatedExecutor {
    latency: Duration,
    fail_every: Option<NonZeroU64>,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatches: Mutex<Vec<(u64, Instant)>>,
}

impl SimulatedExecutor {
    /// Create an executor whose calls take `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_every: None,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            dispatches: Mutex::new(Vec::new()),
        }
    }

    /// Fail every n-th call (n = 1 fails all of them). Zero disables failures.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = NonZeroU64::new(n);
        self
    }

    /// Number of calls started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Most calls ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// `(request, start instant)` for every call, in start order.
    pub fn dispatches(&self) -> Vec<(u64, Instant)> {
        self.dispatches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Decrements the in-flight count even when the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    type Request = u64;
    type Response = u64;
    type Error = SimulatedFailure;

    async fn execute(&self, request: u64) -> Result<u64, SimulatedFailure> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(running, Ordering::Relaxed);

        self.dispatches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request, Instant::now()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.fail_every {
            Some(n) if call % n.get() == 0 => Err(SimulatedFailure { call }),
            _ => Ok(request),
        }
    }
}
