//! RAII guard for automatic lock release

use crate::error::LockResult;
use crate::handle::Lock;
use crate::wait::LockMode;
use std::marker::PhantomData;

/// RAII guard for a [`Lock`] grant (releases on drop)
///
/// Releasing acts for the calling thread's session, so the guard stays on
/// the thread that acquired it.
pub struct LockGuard<'a> {
    lock: &'a Lock,
    mode: LockMode,
    /// Whether the guard has been released manually
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    pub(crate) fn new(lock: &'a Lock, mode: LockMode) -> Self {
        Self {
            lock,
            mode,
            released: false,
            _not_send: PhantomData,
        }
    }

    /// Mode the grant was acquired in
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The guarded lock
    pub fn lock(&self) -> &Lock {
        self.lock
    }

    /// Release early and report the outcome
    ///
    /// Fails with [`LockError::NotOwner`](crate::LockError::NotOwner) if the
    /// grant was cleared by a reset in the meantime.
    pub fn unlock(mut self) -> LockResult<()> {
        self.released = true;
        self.lock.unlock()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            // A reset may already have cleared the grant
            let _ = self.lock.unlock();
        }
    }
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock", &self.lock.name())
            .field("mode", &self.mode)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{LockError, LockManager, LockMode};

    #[test]
    fn test_guard_releases_on_drop() {
        let manager = LockManager::default();
        let lock = manager.create_lock("guarded").unwrap();
        {
            let guard = lock.exclusive_guard().unwrap();
            assert_eq!(guard.mode(), LockMode::Exclusive);
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert!(lock.snapshot().is_free());
    }

    #[test]
    fn test_guard_manual_unlock() {
        let manager = LockManager::default();
        let lock = manager.create_lock("guarded").unwrap();
        let guard = lock.shared_guard().unwrap();
        assert_eq!(guard.lock().name(), "guarded");
        guard.unlock().unwrap();
        assert!(lock.snapshot().is_free());
    }

    #[test]
    fn test_guard_after_reset() {
        let manager = LockManager::default();
        let lock = manager.create_lock("guarded").unwrap();
        let guard = lock.exclusive_guard().unwrap();
        lock.reset();
        assert!(matches!(guard.unlock(), Err(LockError::NotOwner { .. })));
    }
}
