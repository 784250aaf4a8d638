//! Public lock handle
//!
//! A [`Lock`] is one open reference to a named lock. Every operation acts on
//! behalf of the calling thread's session, so a handle shared between threads
//! acquires and releases for whichever thread calls it.
//!
//! Dropping the handle closes it.

use crate::error::LockResult;
use crate::guard::LockGuard;
use crate::id::LockId;
use crate::lock::{NamedLock, Request};
use crate::manager::LockManager;
use crate::session::Session;
use crate::snapshot::LockSnapshot;
use crate::wait::{LockMode, Rank};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a named shared/exclusive lock
pub struct Lock {
    manager: LockManager,
    inner: Arc<NamedLock>,
    /// Session whose open reference this handle accounts for
    opener: Arc<Session>,
    existed: bool,
}

impl Lock {
    pub(crate) fn new(
        manager: LockManager,
        inner: Arc<NamedLock>,
        opener: Arc<Session>,
        existed: bool,
    ) -> Self {
        Self {
            manager,
            inner,
            opener,
            existed,
        }
    }

    /// The lock name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The lock id
    pub fn id(&self) -> LockId {
        self.inner.id()
    }

    /// Whether the lock was already registered when this handle was created
    pub fn already_exists(&self) -> bool {
        self.existed
    }

    fn request(&self, mode: LockMode, rank: Rank, timeout: Option<Duration>) -> LockResult<bool> {
        let session = self.manager.session();
        self.inner.acquire(
            self.manager.coordinator(),
            &session,
            Request {
                mode,
                rank,
                timeout,
            },
        )
    }

    fn default_rank(&self) -> Rank {
        self.manager.options().default_rank
    }

    /// Acquire exclusive access, waiting as long as it takes
    ///
    /// A session that is the only shared holder is upgraded in place.
    pub fn exclusive_lock(&self) -> LockResult<()> {
        self.priority_exclusive_lock(self.default_rank())
    }

    /// Acquire exclusive access, giving up after `timeout`
    ///
    /// Returns `Ok(false)` if the timeout expired first.
    pub fn exclusive_lock_timeout(&self, timeout: Duration) -> LockResult<bool> {
        self.priority_exclusive_lock_timeout(self.default_rank(), timeout)
    }

    /// Acquire exclusive access, queued at `rank` if it has to wait
    pub fn priority_exclusive_lock(&self, rank: Rank) -> LockResult<()> {
        self.request(LockMode::Exclusive, rank, None).map(|_| ())
    }

    /// Acquire exclusive access at `rank`, giving up after `timeout`
    pub fn priority_exclusive_lock_timeout(&self, rank: Rank, timeout: Duration) -> LockResult<bool> {
        self.request(LockMode::Exclusive, rank, Some(timeout))
    }

    /// Acquire shared access, waiting as long as it takes
    pub fn shared_lock(&self) -> LockResult<()> {
        self.priority_shared_lock(self.default_rank())
    }

    /// Acquire shared access, giving up after `timeout`
    pub fn shared_lock_timeout(&self, timeout: Duration) -> LockResult<bool> {
        self.priority_shared_lock_timeout(self.default_rank(), timeout)
    }

    /// Acquire shared access, queued at `rank` if it has to wait
    pub fn priority_shared_lock(&self, rank: Rank) -> LockResult<()> {
        self.request(LockMode::Shared, rank, None).map(|_| ())
    }

    /// Acquire shared access at `rank`, giving up after `timeout`
    pub fn priority_shared_lock_timeout(&self, rank: Rank, timeout: Duration) -> LockResult<bool> {
        self.request(LockMode::Shared, rank, Some(timeout))
    }

    /// Release the calling session's grant
    ///
    /// Fails with [`LockError::NotOwner`](crate::LockError::NotOwner) if the
    /// session holds none.
    pub fn unlock(&self) -> LockResult<()> {
        let session = self.manager.session();
        self.inner.release(self.manager.coordinator(), &session)
    }

    /// Clear every grant on the lock, whoever holds it, and service the queue
    ///
    /// No ownership check is made. Anything that can reach this handle can
    /// strip other sessions of their grants.
    pub fn reset(&self) {
        self.inner.reset(self.manager.coordinator());
    }

    /// Same as [`exclusive_lock`](Self::exclusive_lock)
    pub fn wait_for(&self) -> LockResult<()> {
        self.exclusive_lock()
    }

    /// Same as [`exclusive_lock_timeout`](Self::exclusive_lock_timeout)
    pub fn wait_for_timeout(&self, timeout: Duration) -> LockResult<bool> {
        self.exclusive_lock_timeout(timeout)
    }

    /// Same as [`priority_exclusive_lock`](Self::priority_exclusive_lock)
    pub fn priority_wait(&self, rank: Rank) -> LockResult<()> {
        self.priority_exclusive_lock(rank)
    }

    /// Same as [`priority_exclusive_lock_timeout`](Self::priority_exclusive_lock_timeout)
    pub fn priority_wait_timeout(&self, rank: Rank, timeout: Duration) -> LockResult<bool> {
        self.priority_exclusive_lock_timeout(rank, timeout)
    }

    /// Acquire exclusive access and release it when the guard drops
    pub fn exclusive_guard(&self) -> LockResult<LockGuard<'_>> {
        self.exclusive_lock()?;
        Ok(LockGuard::new(self, LockMode::Exclusive))
    }

    /// Acquire shared access and release it when the guard drops
    pub fn shared_guard(&self) -> LockResult<LockGuard<'_>> {
        self.shared_lock()?;
        Ok(LockGuard::new(self, LockMode::Shared))
    }

    /// Number of requests queued on the lock
    pub fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }

    /// Whether the calling thread's session holds a grant on the lock
    pub fn is_held(&self) -> bool {
        let session = self.manager.session();
        self.inner.holder_sessions().contains(&session.id())
    }

    /// Capture the lock's state
    pub fn snapshot(&self) -> LockSnapshot {
        self.inner.snapshot()
    }

    /// Close the handle, releasing its reference on the lock
    ///
    /// Grants are not released; the last close removes the lock from the
    /// registry.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.opener.forget_opened(self.inner.id()) {
            self.manager.end_access(self.inner.id());
        }
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("id", &self.inner.id())
            .field("name", &self.inner.name())
            .field("already_exists", &self.existed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockError;

    #[test]
    fn test_handle_basic_cycle() {
        let manager = LockManager::default();
        let lock = manager.create_lock("jobs").unwrap();
        assert_eq!(lock.name(), "jobs");
        assert!(!lock.already_exists());

        lock.exclusive_lock().unwrap();
        assert!(lock.is_held());
        lock.unlock().unwrap();
        assert!(!lock.is_held());
        assert!(matches!(lock.unlock(), Err(LockError::NotOwner { .. })));
    }

    #[test]
    fn test_wait_aliases_take_exclusive() {
        let manager = LockManager::default();
        let lock = manager.create_lock("event").unwrap();

        lock.wait_for().unwrap();
        assert!(lock.snapshot().writer.is_some());
        lock.unlock().unwrap();

        assert!(lock.wait_for_timeout(Duration::from_millis(10)).unwrap());
        lock.unlock().unwrap();

        lock.priority_wait(3).unwrap();
        lock.unlock().unwrap();

        assert!(lock.priority_wait_timeout(3, Duration::from_millis(10)).unwrap());
        assert_eq!(lock.snapshot().writer.unwrap().mode, LockMode::Exclusive);
    }

    #[test]
    fn test_shared_then_exclusive_upgrades() {
        let manager = LockManager::default();
        let lock = manager.create_lock("jobs").unwrap();

        lock.shared_lock().unwrap();
        assert!(lock.shared_lock_timeout(Duration::ZERO).unwrap());
        lock.exclusive_lock().unwrap();

        let snap = lock.snapshot();
        assert!(snap.readers.is_empty());
        assert_eq!(snap.writer.unwrap().mode, LockMode::Exclusive);
        assert_eq!(lock.queue_len(), 0);
    }

    #[test]
    fn test_reset_from_same_thread() {
        let manager = LockManager::default();
        let lock = manager.create_lock("jobs").unwrap();
        lock.priority_shared_lock(2).unwrap();
        lock.reset();
        assert!(lock.snapshot().is_free());
        assert!(matches!(lock.unlock(), Err(LockError::NotOwner { .. })));
    }

    #[test]
    fn test_drop_closes_handle() {
        let manager = LockManager::default();
        {
            let _lock = manager.create_lock("scoped").unwrap();
            assert_eq!(manager.lock_count(), 1);
        }
        assert_eq!(manager.lock_count(), 0);
    }
}
