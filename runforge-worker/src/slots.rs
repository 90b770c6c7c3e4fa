/// Concurrency slot manager
///
/// A bounded semaphore arbitrating global execution parallelism, with an
/// optional per-user cap so a single tenant cannot starve the pool. One
/// slot is held for the full duration of one execution's worker-side run.
///
/// # Contract
///
/// - `acquire` blocks until a slot frees up or the token cancels
/// - every successful acquire pairs with exactly one release; [`Slot`]
///   releases on drop and explicit release is idempotent
/// - `slots_acquired_total - slots_released_total == total_active_slots`
///   and `total_active_slots <= capacity` at all times
///
/// The per-user table lives behind a `std::sync::RwLock` that is never held
/// across an await; entries are removed as counts reach zero.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Slot acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The wait was cancelled via the token
    #[error("slot acquisition cancelled")]
    Cancelled,

    /// No slot became available within the bounded wait
    #[error("no slot available within the wait budget")]
    Timeout,

    /// The caller is already at its per-user cap
    #[error("user is at its concurrency limit")]
    UserLimit,

    /// The manager shut the semaphore down
    #[error("slot manager is closed")]
    Closed,
}

/// Point-in-time slot statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SlotStats {
    /// Slots currently held
    pub total_active_slots: usize,

    /// Slots currently free
    pub available_slots: usize,

    /// Lifetime acquisitions
    pub slots_acquired_total: u64,

    /// Lifetime releases
    pub slots_released_total: u64,
}

#[derive(Debug)]
struct SlotInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    per_user_limit: usize,
    user_counts: RwLock<HashMap<Uuid, usize>>,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

/// Concurrency slot manager
#[derive(Clone)]
pub struct SlotManager {
    inner: Arc<SlotInner>,
}

impl SlotManager {
    /// Creates a manager with `capacity` global slots and at most
    /// `per_user_limit` held by any single user (clamped to capacity)
    pub fn new(capacity: usize, per_user_limit: usize) -> Self {
        let capacity = capacity.max(1);
        SlotManager {
            inner: Arc::new(SlotInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                per_user_limit: per_user_limit.clamp(1, capacity),
                user_counts: RwLock::new(HashMap::new()),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
            }),
        }
    }

    /// Acquires a slot, waiting until one frees up or `cancel` fires
    pub async fn acquire(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Slot, SlotError> {
        self.reserve_user(user_id)?;

        let permit = tokio::select! {
            permit = self.inner.semaphore.clone().acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.unreserve_user(user_id);
                        return Err(SlotError::Closed);
                    }
                }
            }
            _ = cancel.cancelled() => {
                self.unreserve_user(user_id);
                return Err(SlotError::Cancelled);
            }
        };

        Ok(self.finish_acquire(user_id, permit))
    }

    /// Acquires a slot with a bounded wait; the dispatcher uses this so a
    /// full pool just leaves work pending for the next poll
    pub async fn try_acquire_timeout(
        &self,
        user_id: Uuid,
        wait: Duration,
    ) -> Result<Slot, SlotError> {
        self.reserve_user(user_id)?;

        match tokio::time::timeout(wait, self.inner.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.finish_acquire(user_id, permit)),
            Ok(Err(_)) => {
                self.unreserve_user(user_id);
                Err(SlotError::Closed)
            }
            Err(_) => {
                self.unreserve_user(user_id);
                Err(SlotError::Timeout)
            }
        }
    }

    fn finish_acquire(&self, user_id: Uuid, permit: OwnedSemaphorePermit) -> Slot {
        self.inner.acquired_total.fetch_add(1, Ordering::Relaxed);
        Slot {
            permit: Some(permit),
            user_id,
            inner: self.inner.clone(),
        }
    }

    /// Reserves a per-user count, failing at the cap
    fn reserve_user(&self, user_id: Uuid) -> Result<(), SlotError> {
        let mut counts = self
            .inner
            .user_counts
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(user_id).or_insert(0);
        if *count >= self.inner.per_user_limit {
            return Err(SlotError::UserLimit);
        }
        *count += 1;
        Ok(())
    }

    fn unreserve_user(&self, user_id: Uuid) {
        let mut counts = self
            .inner
            .user_counts
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&user_id);
            }
        }
    }

    /// Current statistics
    pub fn stats(&self) -> SlotStats {
        let available = self.inner.semaphore.available_permits();
        SlotStats {
            total_active_slots: self.inner.capacity.saturating_sub(available),
            available_slots: available,
            slots_acquired_total: self.inner.acquired_total.load(Ordering::Relaxed),
            slots_released_total: self.inner.released_total.load(Ordering::Relaxed),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A held concurrency slot; released on drop
#[derive(Debug)]
pub struct Slot {
    permit: Option<OwnedSemaphorePermit>,
    user_id: Uuid,
    inner: Arc<SlotInner>,
}

impl Slot {
    /// Releases the slot explicitly; safe to call once, drop is a no-op
    /// afterwards
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.inner.released_total.fetch_add(1, Ordering::Relaxed);
            let mut counts = self
                .inner
                .user_counts
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(count) = counts.get_mut(&self.user_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&self.user_id);
                }
            }
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let slots = SlotManager::new(2, 2);
        let user = Uuid::new_v4();

        let a = slots
            .try_acquire_timeout(user, Duration::from_millis(10))
            .await
            .unwrap();
        let _b = slots
            .try_acquire_timeout(user, Duration::from_millis(10))
            .await
            .unwrap();

        let err = slots
            .try_acquire_timeout(Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SlotError::Timeout));

        drop(a);
        slots
            .try_acquire_timeout(Uuid::new_v4(), Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_per_user_cap() {
        let slots = SlotManager::new(4, 1);
        let greedy = Uuid::new_v4();

        let held = slots
            .try_acquire_timeout(greedy, Duration::from_millis(10))
            .await
            .unwrap();

        // Same user is capped even though global slots remain
        let err = slots
            .try_acquire_timeout(greedy, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SlotError::UserLimit));

        // Another user still gets through
        slots
            .try_acquire_timeout(Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap();

        drop(held);
        slots
            .try_acquire_timeout(greedy, Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counter_invariant() {
        let slots = SlotManager::new(3, 3);
        let user = Uuid::new_v4();

        let a = slots
            .try_acquire_timeout(user, Duration::from_millis(10))
            .await
            .unwrap();
        let b = slots
            .try_acquire_timeout(user, Duration::from_millis(10))
            .await
            .unwrap();

        let stats = slots.stats();
        assert_eq!(stats.total_active_slots, 2);
        assert_eq!(stats.available_slots, 1);
        assert_eq!(
            stats.slots_acquired_total - stats.slots_released_total,
            stats.total_active_slots as u64
        );

        drop(a);
        drop(b);
        let stats = slots.stats();
        assert_eq!(stats.total_active_slots, 0);
        assert_eq!(stats.slots_acquired_total, 2);
        assert_eq!(stats.slots_released_total, 2);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let slots = SlotManager::new(1, 1);
        let slot = slots
            .try_acquire_timeout(Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap();

        // Explicit release, then the drop that follows must not double-count
        slot.release();
        let stats = slots.stats();
        assert_eq!(stats.slots_released_total, 1);
        assert_eq!(stats.available_slots, 1);
    }

    #[tokio::test]
    async fn test_acquire_cancels_promptly() {
        let slots = SlotManager::new(1, 1);
        let _held = slots
            .try_acquire_timeout(Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let slots = slots.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { slots.acquire(Uuid::new_v4(), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("acquire did not return after cancel")
            .unwrap();
        assert!(matches!(result, Err(SlotError::Cancelled)));

        // The cancelled waiter must not leak a user reservation
        let stats = slots.stats();
        assert_eq!(stats.total_active_slots, 1);
    }
}
