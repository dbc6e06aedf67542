//! Fixed-rate admission gate ("ticket dispenser").
//!
//! Epistemic foundation:
//! - K_i: One shared `next_available` instant paces every caller
//! - K_i: The lock only computes a slot, it is never held while waiting
//! - B_i: A caller may be cancelled while waiting for its slot
//! - I^B: Cancelled callers keep their slot; the timeline is never rolled back

use crate::models::{ConfigError, Policy};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Virtual-scheduling rate gate.
///
/// Each admission takes the slot `max(next_available, now)` and pushes
/// `next_available` one interval past it. Slots are handed out in the order
/// callers take the lock, so admission is FIFO by arrival with no burst
/// beyond whatever is immediately free. Waiters queue as suspended tasks;
/// queue depth is unbounded.
#[derive(Debug)]
pub struct RateGate {
    /// Spacing between consecutive slots (1 / rps)
    interval: Duration,
    /// Earliest instant the next slot may be dispatched
    next_available: Mutex<Instant>,
}

impl RateGate {
    /// Create a gate with the given slot spacing.
    ///
    /// `next_available` starts at the construction instant.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_available: Mutex::new(Instant::now()),
        }
    }

    /// Create a gate releasing `rps` calls per second.
    pub fn per_second(rps: f64) -> Result<Self, ConfigError> {
        let interval = Policy::rate(rps)?
            .interval()?
            .ok_or(ConfigError::InvalidRate(rps))?;
        Ok(Self::new(interval))
    }

    /// Earliest instant the next unassigned slot may be dispatched.
    pub fn next_available(&self) -> Instant {
        *self.lock()
    }

    /// How long a caller arriving now would wait.
    pub fn next_slot_in(&self) -> Duration {
        self.next_available()
            .saturating_duration_since(Instant::now())
    }

    /// Assign the caller's slot and advance the timeline. Never waits.
    pub fn reserve(&self) -> Instant {
        let mut next_available = self.lock();
        let now = Instant::now();
        let scheduled = (*next_available).max(now);
        *next_available = scheduled + self.interval;
        scheduled
    }

    /// Reserve a slot, then wait for it outside the lock.
    ///
    /// Returns how long the caller waited. Dropping the future while it waits
    /// gives the slot up without returning it to the timeline.
    pub async fn acquire(&self) -> Duration {
        let scheduled = self.reserve();
        let wait = scheduled.saturating_duration_since(Instant::now());

        if wait > Duration::ZERO {
            debug!(
                wait_ms = wait.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "Waiting for rate slot"
            );
            tokio::time::sleep_until(scheduled).await;
        }

        wait
    }

    // The guarded value is a plain Instant, so a poisoned lock is still valid.
    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.next_available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // The paused clock still rounds timer deadlines up to the millisecond.
    fn assert_near(actual: Duration, expected: Duration) {
        let tolerance = Duration::from_millis(5);
        assert!(
            actual >= expected.saturating_sub(tolerance) && actual <= expected + tolerance,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_never_moves_timeline_backwards() {
        let before = Instant::now();
        for _ in 0..5 {
            let gate = RateGate::per_second(3.0).unwrap();
            assert!(gate.next_available() >= before);
            assert_eq!(gate.next_slot_in(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slots_follow_arrival_order() {
        let gate = RateGate::per_second(4.0).unwrap();
        let a = gate.reserve();
        let b = gate.reserve();

        assert!(a <= b);
        assert_eq!(b - a, Duration::from_millis(250));
        assert_eq!(gate.next_available() - b, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gate_does_not_bank_slots() {
        let gate = RateGate::per_second(10.0).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // After idling, the next slot is "now", not five seconds of backlog.
        let now = Instant::now();
        assert_eq!(gate.reserve(), now);
        assert_eq!(gate.reserve(), now + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_simultaneous_callers() {
        let gate = Arc::new(RateGate::per_second(2.0).unwrap());
        let start = Instant::now();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.acquire().await;
                    Instant::now() - start
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await.unwrap());
        }
        offsets.sort();

        for (i, offset) in offsets.into_iter().enumerate() {
            assert_near(offset, Duration::from_millis(500 * i as u64));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_keeps_its_slot() {
        let gate = RateGate::per_second(1.0).unwrap();
        let start = Instant::now();

        assert_eq!(gate.acquire().await, Duration::ZERO);

        let cancelled = tokio::time::timeout(Duration::from_millis(100), gate.acquire()).await;
        assert!(cancelled.is_err());

        // Slot at t=1s was consumed by the cancelled caller.
        let waited = gate.acquire().await;
        assert_near(Instant::now() - start, Duration::from_secs(2));
        assert_near(waited, Duration::from_millis(1900));
    }
}
