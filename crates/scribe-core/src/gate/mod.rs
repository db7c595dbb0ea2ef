use crate::error::{Result, ScribeError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Identifier of one granted lease.
pub type LeaseId = u64;

#[derive(Debug)]
struct Lease {
    acquired_at: Instant,
    expires_at: Instant,
}

#[derive(Debug)]
struct GateState {
    capacity: usize,
    next_lease: LeaseId,
    leases: HashMap<LeaseId, Lease>,
    expired_total: u64,
}

impl GateState {
    /// Drop leases whose deadline has passed. Returns how many were reclaimed.
    fn reap(&mut self, now: Instant) -> usize {
        let before = self.leases.len();
        self.leases.retain(|id, lease| {
            let live = lease.expires_at > now;
            if !live {
                log::warn!(
                    "Reclaiming concurrency slot lease {} held for {:?}",
                    id,
                    now.duration_since(lease.acquired_at)
                );
            }
            live
        });
        let reaped = before - self.leases.len();
        self.expired_total += reaped as u64;
        reaped
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.leases.values().map(|l| l.expires_at).min()
    }
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
    notify: Notify,
    lease: Duration,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, id: LeaseId) -> bool {
        let removed = self.lock().leases.remove(&id).is_some();
        if removed {
            self.notify.notify_waiters();
        }
        removed
    }
}

/// Admission control for the summarisation stage.
///
/// Hands out at most `capacity` slots at once. Every slot is a lease with an
/// expiry: if a holder hangs past its lease, the slot is reclaimed so the
/// pool cannot be exhausted permanently. Slots are released on drop, so
/// every exit path of a run (including cancellation) returns its slot.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize, lease: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    capacity,
                    next_lease: 0,
                    leases: HashMap::new(),
                    expired_total: 0,
                }),
                notify: Notify::new(),
                lease,
            }),
        }
    }

    /// Take a slot without waiting.
    pub fn try_acquire(&self) -> Option<ConcurrencySlot> {
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.reap(now);
        if state.leases.len() >= state.capacity {
            return None;
        }
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            id,
            Lease {
                acquired_at: now,
                expires_at: now + self.inner.lease,
            },
        );
        Some(ConcurrencySlot {
            id,
            gate: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Wait up to `timeout` for a slot. Fails with `Throttled` when none
    /// frees up in time; callers should re-deliver the event later.
    pub async fn acquire(&self, timeout: Duration) -> Result<ConcurrencySlot> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(slot) = self.try_acquire() {
                return Ok(slot);
            }

            let now = Instant::now();
            if now >= deadline {
                let state = self.inner.lock();
                return Err(ScribeError::Throttled(format!(
                    "no concurrency slot within {:?} ({} of {} in use)",
                    timeout,
                    state.leases.len(),
                    state.capacity
                )));
            }

            // Wake at the deadline, or earlier if a lease is due to expire.
            let wake_at = match self.inner.lock().next_expiry() {
                Some(expiry) if expiry < deadline => expiry,
                _ => deadline,
            };
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    /// Return a slot to the pool. Returns `false` if the slot was no longer
    /// valid (its lease had already been reclaimed).
    pub fn release(&self, mut slot: ConcurrencySlot) -> bool {
        slot.released = true;
        self.inner.release(slot.id)
    }

    /// Change the number of slots. Shrinking never revokes held slots; new
    /// admissions wait until usage falls below the new capacity.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(ScribeError::Config("max_concurrency must be > 0".into()));
        }
        let previous = {
            let mut state = self.inner.lock();
            std::mem::replace(&mut state.capacity, capacity)
        };
        if previous != capacity {
            log::info!("Concurrency gate capacity changed {} -> {}", previous, capacity);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Slots currently leased out.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().leases.len()
    }

    /// Leases reclaimed by expiry since the gate was created.
    pub fn expired_total(&self) -> u64 {
        self.inner.lock().expired_total
    }

    /// Reclaim expired leases now. Returns how many were reclaimed.
    pub fn reap_expired(&self) -> usize {
        let reaped = self.inner.lock().reap(Instant::now());
        if reaped > 0 {
            self.inner.notify.notify_waiters();
        }
        reaped
    }

    pub fn lease_duration(&self) -> Duration {
        self.inner.lease
    }
}

/// A held concurrency slot. Released on drop.
#[derive(Debug)]
pub struct ConcurrencySlot {
    id: LeaseId,
    gate: Arc<GateInner>,
    released: bool,
}

impl ConcurrencySlot {
    pub fn lease_id(&self) -> LeaseId {
        self.id
    }

    /// Whether the lease is still held, i.e. has not been reclaimed.
    pub fn is_valid(&self) -> bool {
        !self.released && self.gate.lock().leases.contains_key(&self.id)
    }
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.gate.release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_default_capacity_admits_one() {
        let gate = ConcurrencyGate::new(1, LEASE);

        let slot = gate.try_acquire().expect("first slot");
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.in_flight(), 1);

        assert!(gate.release(slot));
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_with_throttled() {
        let gate = ConcurrencyGate::new(1, LEASE);
        let _held = gate.try_acquire().unwrap();

        let err = gate.acquire(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ScribeError::Throttled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_is_woken_by_release() {
        let gate = ConcurrencyGate::new(1, LEASE);
        let held = gate.try_acquire().unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(held);

        let slot = waiter.await.unwrap().expect("waiter should get the slot");
        assert!(slot.is_valid());
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_reclaimed_and_late_release_is_noop() {
        let gate = ConcurrencyGate::new(1, Duration::from_secs(5));
        let stale = gate.try_acquire().unwrap();

        // Waiting longer than the lease lets the next caller in.
        let fresh = gate
            .acquire(Duration::from_secs(10))
            .await
            .expect("expired lease should be reclaimed");

        assert!(!stale.is_valid());
        assert_eq!(gate.expired_total(), 1);

        // The stale holder's release must not free the fresh holder's slot.
        assert!(!gate.release(stale));
        assert_eq!(gate.in_flight(), 1);
        assert!(fresh.is_valid());
    }

    #[tokio::test]
    async fn test_drop_after_release_does_not_double_count() {
        let gate = ConcurrencyGate::new(2, LEASE);
        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();

        assert!(gate.release(a));
        drop(b);
        assert_eq!(gate.in_flight(), 0);

        let _c = gate.try_acquire().unwrap();
        let _d = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_capacity_is_tunable_at_runtime() {
        let gate = ConcurrencyGate::new(1, LEASE);
        let _a = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());

        gate.set_capacity(2).unwrap();
        let _b = gate.try_acquire().expect("capacity raised");

        gate.set_capacity(1).unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert!(gate.try_acquire().is_none());

        assert!(gate.set_capacity(0).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_capacity() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let gate = ConcurrencyGate::new(3, LEASE);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let gate = gate.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _slot = gate.acquire(Duration::from_secs(30)).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_flight(), 0);
    }
}
