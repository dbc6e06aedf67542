//! Admission-control wrapper around a downstream executor.
//!
//! Epistemic foundation:
//! - K_i: Exactly one policy is active: fixed concurrency or fixed rate
//! - K_i: Tokens are RAII permits, released on success, failure, cancel or panic
//! - B_i: Downstream calls may fail → returned verbatim, never retried
//! - I^B: Callers may be cancelled at any suspension point

use crate::client::{ChatClient, ChatExecutor, Executor, RateGate};
use crate::models::{ChatPayload, ChatResult, ConfigError, ExecuteError, LimitConfig, Policy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Admission statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionStats {
    /// Calls that passed every gate and reached the executor
    pub admitted: u64,
    /// Downstream calls that returned `Ok`
    pub succeeded: u64,
    /// Downstream calls that returned `Err`
    pub failed: u64,
    /// Callers turned away because the manager was closed
    pub rejected: u64,
    /// Downstream calls running right now
    pub in_flight: usize,
    /// Most downstream calls ever running at once
    pub peak_in_flight: usize,
    /// Total time admitted callers spent waiting at the gates
    pub total_wait_secs: f64,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    total_wait_micros: AtomicU64,
}

/// Keeps `in_flight` honest when a downstream call is cancelled mid-flight.
struct InFlightGuard<'a> {
    counters: &'a Counters,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let running = counters.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak_in_flight.fetch_max(running, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Batch task handles, aborted if the batch is dropped before they finish.
struct AbortOnDrop<T>(Vec<JoinHandle<T>>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Rate limit manager.
///
/// Sits in front of an [`Executor`] and enforces one [`Policy`]:
///
/// - `Concurrency(n)`: each caller holds one of `n` permits for the duration
///   of its downstream call.
/// - `Rate { rps, .. }`: each caller takes a slot from the shared
///   [`RateGate`] and waits for it; once admitted, calls run unbounded unless
///   `max_in_flight` adds a concurrency gate *after* the rate gate.
///
/// Long-lived and shared; wrap it in an `Arc` to use it from many tasks.
pub struct RateLimitManager<X: Executor> {
    executor: Arc<X>,
    policy: Policy,
    rate_gate: Option<RateGate>,
    permits: Option<Semaphore>,
    closed: AtomicBool,
    shutdown: Notify,
    counters: Counters,
}

impl<X: Executor> std::fmt::Debug for RateLimitManager<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("policy", &self.policy)
            .field("rate_gate", &self.rate_gate)
            .field("permits", &self.permits)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<X: Executor> RateLimitManager<X> {
    /// Create a manager from user-facing limits.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if neither or both of `rps` / `concurrency`
    /// are set, if a value is out of range, or if `max_in_flight` is given
    /// without `rps`.
    pub fn new(executor: Arc<X>, config: LimitConfig) -> Result<Self, ConfigError> {
        Self::with_policy(executor, config.policy()?)
    }

    /// Create a manager from a policy.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a hand-built policy carries an out-of-range
    /// rate or token count.
    pub fn with_policy(executor: Arc<X>, policy: Policy) -> Result<Self, ConfigError> {
        policy.validate()?;
        let rate_gate = policy.interval()?.map(RateGate::new);
        let permits = policy.permits().map(|n| Semaphore::new(n.get()));

        info!(policy = %policy, "Rate limit manager created");

        Ok(Self {
            executor,
            policy,
            rate_gate,
            permits,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            counters: Counters::default(),
        })
    }

    /// Get the active policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Get the downstream executor.
    pub fn executor(&self) -> &Arc<X> {
        &self.executor
    }

    /// Free admission tokens, or `None` when no concurrency gate is active.
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(Semaphore::available_permits)
    }

    /// Wait a caller arriving now would spend at the rate gate.
    ///
    /// `None` for a concurrency policy.
    pub fn next_slot_in(&self) -> Option<Duration> {
        self.rate_gate.as_ref().map(RateGate::next_slot_in)
    }

    /// Run one request through the admission gates and the executor.
    ///
    /// Dropping the returned future cancels the caller. A cancelled caller
    /// releases any permit it held; a rate slot it was assigned stays used.
    pub async fn execute(&self, request: X::Request) -> Result<X::Response, ExecuteError<X::Error>> {
        // Registered before the closed check so a concurrent close() cannot
        // slip between the two.
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        self.ensure_open()?;
        let mut waited = Duration::ZERO;

        if let Some(gate) = &self.rate_gate {
            tokio::select! {
                wait = gate.acquire() => waited += wait,
                _ = &mut shutdown => return Err(self.reject()),
            }
            self.ensure_open()?;
        }

        // Bound to a name so it lives until the downstream call has returned.
        let _permit = match &self.permits {
            Some(permits) => Some(self.acquire_permit(permits, &mut waited).await?),
            None => None,
        };

        self.dispatch(request, waited).await
    }

    /// Run many requests concurrently, one spawned task each.
    ///
    /// Results come back in input order. A task that panics yields
    /// `ExecuteError::TaskFailed` in its position. Dropping the returned
    /// future aborts every task still waiting or running.
    pub async fn execute_batch(
        self: &Arc<Self>,
        requests: Vec<X::Request>,
    ) -> Vec<Result<X::Response, ExecuteError<X::Error>>>
    where
        X: 'static,
    {
        let mut handles = AbortOnDrop(
            requests
                .into_iter()
                .map(|request| {
                    let manager = Arc::clone(self);
                    tokio::spawn(async move { manager.execute(request).await })
                })
                .collect(),
        );

        let mut results = Vec::with_capacity(handles.0.len());
        for (index, handle) in handles.0.iter_mut().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(index = index, error = %e, "Batch task panicked");
                    results.push(Err(ExecuteError::TaskFailed(e.to_string())));
                }
            }
        }

        results
    }

    /// Stop admitting callers.
    ///
    /// Callers waiting for a permit or a rate slot, and any later caller, get
    /// `ExecuteError::Closed`. Calls already dispatched run to completion.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }
        self.shutdown.notify_waiters();
        warn!(
            policy = %self.policy,
            in_flight = self.counters.in_flight.load(Ordering::Relaxed),
            "Rate limit manager closed"
        );
    }

    /// Check if the manager has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get statistics.
    pub fn stats(&self) -> AdmissionStats {
        let c = &self.counters;
        AdmissionStats {
            admitted: c.admitted.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
            peak_in_flight: c.peak_in_flight.load(Ordering::Relaxed),
            total_wait_secs: c.total_wait_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }

    async fn acquire_permit<'a>(
        &self,
        permits: &'a Semaphore,
        waited: &mut Duration,
    ) -> Result<SemaphorePermit<'a>, ExecuteError<X::Error>> {
        if let Ok(permit) = permits.try_acquire() {
            return Ok(permit);
        }

        debug!(policy = %self.policy, "Waiting for admission token");
        let start = tokio::time::Instant::now();
        let permit = permits.acquire().await.map_err(|_| self.reject())?;
        *waited += start.elapsed();
        Ok(permit)
    }

    async fn dispatch(
        &self,
        request: X::Request,
        waited: Duration,
    ) -> Result<X::Response, ExecuteError<X::Error>> {
        let c = &self.counters;
        c.admitted.fetch_add(1, Ordering::Relaxed);
        c.total_wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);

        let result = {
            let _in_flight = InFlightGuard::enter(c);
            self.executor.execute(request).await
        };

        match result {
            Ok(response) => {
                c.succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(response)
            }
            Err(e) => {
                c.failed.fetch_add(1, Ordering::Relaxed);
                warn!(policy = %self.policy, error = %e, "Downstream call failed");
                Err(ExecuteError::Downstream(e))
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ExecuteError<X::Error>> {
        if self.is_closed() {
            return Err(self.reject());
        }
        Ok(())
    }

    fn reject(&self) -> ExecuteError<X::Error> {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        ExecuteError::Closed
    }
}

impl<C: ChatClient> RateLimitManager<ChatExecutor<C>> {
    /// Send a chat payload through the gates.
    pub async fn chat(&self, payload: ChatPayload) -> Result<ChatResult, ExecuteError<C::Error>> {
        self.execute(payload).await
    }
}
