use super::error::{Error, Result};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded counter of concurrent transactions.
///
/// Starts at capacity 1 until the session setup negotiates the real value.
#[derive(Debug)]
pub struct TransactionManager {
    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    /// Permits to retire as soon as their holders release them, left over
    /// from a shrink while they were in use.
    debt: Arc<AtomicUsize>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            capacity: AtomicUsize::new(1),
            debt: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Free slots right now.
    #[inline]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    ///
    /// Fails with [`Error::ErrUseClosedConnection`] once the manager is shut down,
    /// including for callers already waiting.
    pub async fn acquire(&self) -> Result<TransactionGuard> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::ErrUseClosedConnection)?;
        Ok(TransactionGuard {
            permit: Some(permit),
            debt: Arc::clone(&self.debt),
        })
    }

    /// Resize. Values below 1 are raised to 1.
    ///
    /// Growing wakes waiters immediately. Shrinking never revokes a held
    /// slot; the excess is retired as guards are dropped.
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let old = self.capacity.swap(capacity, Ordering::AcqRel);
        if capacity > old {
            let mut grow = capacity - old;
            // Cancel outstanding debt first.
            let _ = self
                .debt
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                    let paid = d.min(grow);
                    Some(d - paid)
                })
                .map(|d| grow -= d.min(grow));
            if grow > 0 {
                self.semaphore.add_permits(grow);
            }
        } else if capacity < old {
            let mut shrink = old - capacity;
            while shrink > 0 {
                match self.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            if shrink > 0 {
                self.debt.fetch_add(shrink, Ordering::AcqRel);
            }
        }
        debug!(old, new = capacity, "transaction capacity updated");
    }

    /// Reject all pending and future acquisitions.
    pub fn shutdown(&self) {
        self.semaphore.close();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// One admitted transaction. The slot returns to the manager on drop.
#[derive(Debug)]
pub struct TransactionGuard {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let retired = self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok();
        if retired {
            permit.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn admits_at_most_capacity() {
        let tm = Arc::new(TransactionManager::new());
        tm.set_capacity(3);

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(tm.acquire().await.unwrap());
        }
        assert_eq!(tm.available(), 0);

        let tm2 = Arc::clone(&tm);
        let mut fourth = tokio::spawn(async move { tm2.acquire().await.map(drop) });
        assert!(timeout(Duration::from_millis(50), &mut fourth).await.is_err());

        held.pop();
        let admitted = timeout(Duration::from_millis(50), &mut fourth).await;
        assert!(matches!(admitted, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn starts_with_one_slot() {
        let tm = TransactionManager::new();
        assert_eq!(tm.capacity(), 1);
        let _g = tm.acquire().await.unwrap();
        assert_eq!(tm.available(), 0);
    }

    #[tokio::test]
    async fn shrink_retires_held_slots_on_release() {
        let tm = TransactionManager::new();
        tm.set_capacity(3);
        let a = tm.acquire().await.unwrap();
        let b = tm.acquire().await.unwrap();
        let c = tm.acquire().await.unwrap();

        tm.set_capacity(1);
        drop(a);
        drop(b);
        assert_eq!(tm.available(), 0);
        drop(c);
        assert_eq!(tm.available(), 1);
    }

    #[tokio::test]
    async fn shrink_takes_idle_slots_immediately() {
        let tm = TransactionManager::new();
        tm.set_capacity(4);
        tm.set_capacity(2);
        assert_eq!(tm.available(), 2);
        tm.set_capacity(0);
        assert_eq!(tm.capacity(), 1);
        assert_eq!(tm.available(), 1);
    }

    #[tokio::test]
    async fn growth_cancels_pending_debt() {
        let tm = TransactionManager::new();
        tm.set_capacity(2);
        let a = tm.acquire().await.unwrap();
        let b = tm.acquire().await.unwrap();
        tm.set_capacity(1);
        tm.set_capacity(3);
        drop(a);
        drop(b);
        assert_eq!(tm.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wakes_waiters_with_error() {
        let tm = Arc::new(TransactionManager::new());
        let _held = tm.acquire().await.unwrap();
        let tm2 = Arc::clone(&tm);
        let waiter = tokio::spawn(async move { tm2.acquire().await.map(drop) });
        tokio::task::yield_now().await;

        tm.shutdown();
        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(Error::ErrUseClosedConnection)));
        assert!(tm.acquire().await.is_err());
    }
}
