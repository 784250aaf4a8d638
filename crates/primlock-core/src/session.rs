//! Per-thread sessions
//!
//! A session is the identity every ownership check is made against. The
//! manager hands out one per thread. Besides its id, a session remembers
//! which locks it holds grants on and which locks it has opened, so that
//! closing it can release everything.
//!
//! Only the owning thread records or forgets its grants. A grant cleared by
//! someone else's `reset` leaves a stale entry behind; teardown tolerates it.

use crate::id::{LockId, SessionId};
use crate::lock::NamedLock;
use crate::wait::WaitObject;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Where a session is currently parked
type Parked = (Arc<NamedLock>, Arc<WaitObject>);

/// Per-thread identity holding grants and opened locks
pub struct Session {
    id: SessionId,
    thread: ThreadId,
    grants: Mutex<Vec<LockId>>,
    opened: Mutex<Vec<LockId>>,
    interrupted: AtomicBool,
    parked: Mutex<Option<Parked>>,
}

impl Session {
    pub(crate) fn new(thread: ThreadId) -> Self {
        Self {
            id: SessionId::next(),
            thread,
            grants: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            interrupted: AtomicBool::new(false),
            parked: Mutex::new(None),
        }
    }

    /// The session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The thread this session belongs to
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Locks this session believes it holds a grant on
    pub fn held_locks(&self) -> Vec<LockId> {
        self.grants.lock().clone()
    }

    /// Whether the session is parked waiting for a lock
    pub fn is_waiting(&self) -> bool {
        self.parked.lock().is_some()
    }

    /// Interrupt the session
    ///
    /// If the session is parked on a lock request, that request is withdrawn
    /// and fails with [`LockError::Interrupted`](crate::LockError::Interrupted).
    /// Otherwise the interruption stays pending and fails the session's next
    /// request that has to wait.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let parked = self.parked.lock().clone();
        if let Some((lock, waiter)) = parked {
            lock.wake(&waiter);
        }
    }

    /// Consume a pending interruption
    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn park_on(&self, lock: Arc<NamedLock>, waiter: Arc<WaitObject>) {
        *self.parked.lock() = Some((lock, waiter));
    }

    pub(crate) fn unpark(&self) {
        self.parked.lock().take();
    }

    pub(crate) fn record_grant(&self, lock: LockId) {
        let mut grants = self.grants.lock();
        if !grants.contains(&lock) {
            grants.push(lock);
        }
    }

    pub(crate) fn forget_grant(&self, lock: LockId) {
        self.grants.lock().retain(|held| *held != lock);
    }

    pub(crate) fn take_grants(&self) -> Vec<LockId> {
        std::mem::take(&mut *self.grants.lock())
    }

    pub(crate) fn note_opened(&self, lock: LockId) {
        self.opened.lock().push(lock);
    }

    /// Forget one open reference; false if the session no longer has one
    pub(crate) fn forget_opened(&self, lock: LockId) -> bool {
        let mut opened = self.opened.lock();
        match opened.iter().position(|held| *held == lock) {
            Some(pos) => {
                opened.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_opened(&self) -> Vec<LockId> {
        std::mem::take(&mut *self.opened.lock())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("thread", &self.thread)
            .field("grants", &*self.grants.lock())
            .field("opened", &*self.opened.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(std::thread::current().id())
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(session().id(), session().id());
    }

    #[test]
    fn test_record_grant_is_idempotent() {
        let s = session();
        let lock = LockId::from_u64(1);
        s.record_grant(lock);
        s.record_grant(lock);
        assert_eq!(s.held_locks(), vec![lock]);

        s.forget_grant(lock);
        assert!(s.held_locks().is_empty());
    }

    #[test]
    fn test_opened_is_counted() {
        let s = session();
        let lock = LockId::from_u64(1);
        s.note_opened(lock);
        s.note_opened(lock);

        assert!(s.forget_opened(lock));
        assert!(s.forget_opened(lock));
        assert!(!s.forget_opened(lock));
    }

    #[test]
    fn test_take_drains() {
        let s = session();
        s.record_grant(LockId::from_u64(1));
        s.note_opened(LockId::from_u64(2));

        assert_eq!(s.take_grants(), vec![LockId::from_u64(1)]);
        assert_eq!(s.take_opened(), vec![LockId::from_u64(2)]);
        assert!(s.take_grants().is_empty());
        assert!(!s.forget_opened(LockId::from_u64(2)));
    }

    #[test]
    fn test_interrupt_while_idle_stays_pending() {
        let s = session();
        assert!(!s.take_interrupt());
        s.interrupt();
        assert!(!s.is_waiting());
        assert!(s.take_interrupt());
        assert!(!s.take_interrupt());
    }
}
