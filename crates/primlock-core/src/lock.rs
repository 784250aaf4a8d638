//! Named shared/exclusive lock
//!
//! State over `(writer, readers)`:
//!
//! - FREE: no writer, no readers
//! - SHARED(n): no writer, n >= 1 readers
//! - EXCLUSIVE: a writer, no readers
//!
//! All of it, together with the wait queue, lives inside the lock's own
//! critical section. Whenever the set of holders or a session's pending
//! request changes, the manager's global section is entered (nested inside
//! the lock's) to keep the wait-for graph in step.

use crate::error::{LockError, LockResult};
use crate::graph::{Coordinator, PendingWait, WaitGraph};
use crate::id::{GrantId, LockId, SessionId};
use crate::section::{CriticalSection, SectionGuard};
use crate::session::Session;
use crate::snapshot::{GrantSnapshot, LockSnapshot, WaiterSnapshot};
use crate::wait::{LockMode, Rank, WaitObject, WaitQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One session's hold on one lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Grant {
    pub(crate) id: GrantId,
    pub(crate) session: SessionId,
    pub(crate) mode: LockMode,
}

impl Grant {
    fn new(session: SessionId, mode: LockMode) -> Self {
        Self {
            id: GrantId::next(),
            session,
            mode,
        }
    }
}

/// A lock request as issued by a handle
#[derive(Debug, Clone, Copy)]
pub(crate) struct Request {
    pub(crate) mode: LockMode,
    pub(crate) rank: Rank,
    pub(crate) timeout: Option<Duration>,
}

#[derive(Debug)]
pub(crate) struct LockState {
    writer: Option<Grant>,
    readers: Vec<Grant>,
    queue: WaitQueue,
}

impl LockState {
    fn new(id: LockId) -> Self {
        Self {
            writer: None,
            readers: Vec::new(),
            queue: WaitQueue::new(id),
        }
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }

    fn is_writer(&self, session: SessionId) -> bool {
        self.writer.is_some_and(|grant| grant.session == session)
    }

    fn is_reader(&self, session: SessionId) -> bool {
        self.readers.iter().any(|grant| grant.session == session)
    }

    fn is_sole_reader(&self, session: SessionId) -> bool {
        matches!(self.readers.as_slice(), [only] if only.session == session)
    }

    fn holder_sessions(&self) -> Vec<SessionId> {
        match self.writer {
            Some(grant) => vec![grant.session],
            None => self.readers.iter().map(|grant| grant.session).collect(),
        }
    }

    /// Install `session` as writer, reusing its reader grant if it is the sole reader
    fn install_writer(&mut self, session: SessionId) -> Grant {
        let grant = match self.readers.pop() {
            Some(mut grant) if grant.session == session && self.readers.is_empty() => {
                grant.mode = LockMode::Exclusive;
                grant
            }
            Some(other) => {
                // Callers only get here with no readers or a sole own reader
                self.readers.push(other);
                Grant::new(session, LockMode::Exclusive)
            }
            None => Grant::new(session, LockMode::Exclusive),
        };
        self.writer = Some(grant);
        grant
    }

    /// Whether the front exclusive request of `session` can be granted now
    fn admits_writer(&self, session: SessionId) -> bool {
        self.writer.is_none() && (self.readers.is_empty() || self.is_sole_reader(session))
    }
}

/// How a parked request ended
enum WaitOutcome {
    Granted,
    TimedOut,
    Interrupted,
}

pub(crate) struct NamedLock {
    id: LockId,
    name: String,
    section: CriticalSection<LockState>,
    /// Open handles; only changed under the registry exclusion
    access_count: AtomicUsize,
}

impl NamedLock {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let id = LockId::next();
        Self {
            id,
            name: name.into(),
            section: CriticalSection::new(LockState::new(id)),
            access_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> LockId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn begin_access(&self) -> usize {
        self.access_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference; returns the remaining count
    pub(crate) fn end_access(&self) -> usize {
        let previous = self
            .access_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub(crate) fn access_count(&self) -> usize {
        self.access_count.load(Ordering::Acquire)
    }

    /// Acquire the lock for `session`
    ///
    /// Returns `Ok(true)` once granted and `Ok(false)` if a timed request
    /// expired first. A request the session already holds succeeds at once.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        coord: &Coordinator,
        session: &Session,
        request: Request,
    ) -> LockResult<bool> {
        let sid = session.id();
        let mut state = self.section.enter();

        match request.mode {
            LockMode::Exclusive => {
                if state.is_writer(sid) {
                    return Ok(true);
                }
                if state.is_free() {
                    let grant = state.install_writer(sid);
                    self.publish_holders(coord, &state);
                    session.record_grant(self.id);
                    tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, "exclusive granted");
                    return Ok(true);
                }
                if state.is_sole_reader(sid) {
                    let grant = state.install_writer(sid);
                    tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, "upgraded in place");
                    return Ok(true);
                }
            }
            LockMode::Shared => {
                if state.is_reader(sid) || state.is_writer(sid) {
                    return Ok(true);
                }
                if state.writer.is_none() {
                    let grant = Grant::new(sid, LockMode::Shared);
                    state.readers.push(grant);
                    self.publish_holders(coord, &state);
                    session.record_grant(self.id);
                    tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, readers = state.readers.len(), "shared granted");
                    return Ok(true);
                }
            }
        }

        // A timeout too large to represent parks without a deadline but stays bounded
        let deadline = request
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let waiter = self.enqueue(coord, &mut state, sid, request)?;
        session.park_on(self.clone(), waiter.clone());
        let outcome = Self::park(&mut state, session, &waiter, deadline);
        session.unpark();

        match outcome {
            WaitOutcome::Granted => {
                session.record_grant(self.id);
                Ok(true)
            }
            WaitOutcome::TimedOut => {
                self.withdraw(coord, &mut state, &waiter);
                tracing::debug!(lock = %self.name, session = %sid, "timed out, request withdrawn");
                Ok(false)
            }
            WaitOutcome::Interrupted => {
                self.withdraw(coord, &mut state, &waiter);
                tracing::debug!(lock = %self.name, session = %sid, "interrupted, request withdrawn");
                Err(LockError::Interrupted {
                    session: sid,
                    lock: self.name.clone(),
                })
            }
        }
    }

    /// Check for deadlock and queue the request, atomically across all locks
    fn enqueue(
        &self,
        coord: &Coordinator,
        state: &mut LockState,
        sid: SessionId,
        request: Request,
    ) -> LockResult<Arc<WaitObject>> {
        let bounded = request.timeout.is_some();
        let mut graph = coord.enter();

        if !bounded && coord.detects_deadlocks() {
            if let Some(cycle) = graph.find_cycle(sid, self.id) {
                tracing::debug!(lock = %self.name, session = %sid, ?cycle, "deadlock refused");
                return Err(LockError::Deadlock {
                    lock: self.name.clone(),
                    requester: sid,
                    cycle,
                });
            }
        }

        let waiter = state.queue.enqueue(sid, request.mode, request.rank, bounded);
        graph.set_pending(
            sid,
            PendingWait {
                lock: self.id,
                bounded,
            },
        );
        tracing::trace!(
            lock = %self.name,
            session = %sid,
            mode = %request.mode,
            rank = request.rank,
            queued = state.queue.len(),
            "request queued"
        );
        Ok(waiter)
    }

    fn park(
        state: &mut SectionGuard<'_, LockState>,
        session: &Session,
        waiter: &WaitObject,
        deadline: Option<Instant>,
    ) -> WaitOutcome {
        loop {
            if waiter.is_signaled() {
                return WaitOutcome::Granted;
            }
            if session.take_interrupt() {
                return WaitOutcome::Interrupted;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return WaitOutcome::TimedOut;
            }
            state.park(waiter.condvar(), deadline);
        }
    }

    /// Take a request that is still queued out of the queue and graph
    fn withdraw(&self, coord: &Coordinator, state: &mut LockState, waiter: &WaitObject) {
        debug_assert_eq!(waiter.lock(), self.id);
        state.queue.remove(waiter);
        coord.enter().clear_pending(waiter.session());
        // The withdrawn request may have been holding back the ones behind it
        self.retry(coord, state);
    }

    /// Release the grant `session` holds
    pub(crate) fn release(&self, coord: &Coordinator, session: &Session) -> LockResult<()> {
        let sid = session.id();
        let mut state = self.section.enter();
        session.forget_grant(self.id);

        let released = if state.is_writer(sid) {
            state.writer.take()
        } else {
            match state.readers.iter().position(|grant| grant.session == sid) {
                Some(pos) => Some(state.readers.remove(pos)),
                None => None,
            }
        };

        let Some(grant) = released else {
            return Err(LockError::NotOwner {
                session: sid,
                lock: self.name.clone(),
            });
        };
        tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, mode = %grant.mode, "released");

        self.retry(coord, &mut state);
        Ok(())
    }

    /// Clear every grant regardless of who holds it
    pub(crate) fn reset(&self, coord: &Coordinator) {
        let mut state = self.section.enter();
        let cleared = usize::from(state.writer.take().is_some()) + state.readers.len();
        state.readers.clear();
        tracing::debug!(lock = %self.name, cleared, "reset");
        self.retry(coord, &mut state);
    }

    /// Grant queued requests front to back until one cannot be granted
    fn retry(&self, coord: &Coordinator, state: &mut LockState) {
        let mut graph = coord.enter();

        while let Some(front) = state.queue.front() {
            let sid = front.session();
            match front.mode() {
                LockMode::Shared => {
                    if state.writer.is_some() {
                        break;
                    }
                    let Some(waiter) = state.queue.pop_front() else {
                        break;
                    };
                    let grant = Grant::new(sid, LockMode::Shared);
                    state.readers.push(grant);
                    Self::signal(&mut graph, &waiter);
                    tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, "shared granted from queue");
                }
                LockMode::Exclusive => {
                    if !state.admits_writer(sid) {
                        break;
                    }
                    let Some(waiter) = state.queue.pop_front() else {
                        break;
                    };
                    let grant = state.install_writer(sid);
                    Self::signal(&mut graph, &waiter);
                    tracing::trace!(lock = %self.name, session = %sid, grant = %grant.id, "exclusive granted from queue");
                    break;
                }
            }
        }

        graph.set_holders(self.id, state.holder_sessions());
    }

    fn signal(graph: &mut WaitGraph, waiter: &WaitObject) {
        graph.clear_pending(waiter.session());
        waiter.notify();
    }

    fn publish_holders(&self, coord: &Coordinator, state: &LockState) {
        coord.enter().set_holders(self.id, state.holder_sessions());
    }

    /// Wake a parked waiter so it re-checks its interruption flag
    pub(crate) fn wake(&self, waiter: &WaitObject) {
        let _state = self.section.enter();
        waiter.wake();
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.section.enter().queue.len()
    }

    pub(crate) fn holder_sessions(&self) -> Vec<SessionId> {
        self.section.enter().holder_sessions()
    }

    pub(crate) fn snapshot(&self) -> LockSnapshot {
        let state = self.section.enter();
        let grant = |grant: &Grant| GrantSnapshot {
            grant: grant.id,
            session: grant.session,
            mode: grant.mode,
        };
        LockSnapshot {
            id: self.id,
            name: self.name.clone(),
            access_count: self.access_count(),
            writer: state.writer.as_ref().map(grant),
            readers: state.readers.iter().map(grant).collect(),
            waiters: state
                .queue
                .iter()
                .map(|waiter| WaiterSnapshot {
                    session: waiter.session(),
                    mode: waiter.mode(),
                    rank: waiter.rank(),
                    bounded: waiter.is_bounded(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("access_count", &self.access_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn session() -> Session {
        Session::new(thread::current().id())
    }

    fn request(mode: LockMode) -> Request {
        Request {
            mode,
            rank: 0,
            timeout: None,
        }
    }

    fn timed(mode: LockMode, timeout: Duration) -> Request {
        Request {
            mode,
            rank: 0,
            timeout: Some(timeout),
        }
    }

    fn setup() -> (Coordinator, Arc<NamedLock>) {
        (Coordinator::new(true), Arc::new(NamedLock::new("test")))
    }

    #[test]
    fn test_exclusive_on_free_lock() {
        let (coord, lock) = setup();
        let a = session();

        assert!(lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap());
        let snap = lock.snapshot();
        assert_eq!(snap.writer.unwrap().session, a.id());
        assert!(snap.readers.is_empty());
        assert_eq!(a.held_locks(), vec![lock.id()]);
        assert_eq!(coord.enter().holders(lock.id()), &[a.id()]);
    }

    #[test]
    fn test_repeated_exclusive_is_noop() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        let first = lock.snapshot().writer.unwrap().grant;
        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        assert_eq!(lock.snapshot().writer.unwrap().grant, first);

        lock.release(&coord, &a).unwrap();
        assert!(lock.snapshot().writer.is_none());
    }

    #[test]
    fn test_shared_grants_are_compatible() {
        let (coord, lock) = setup();
        let a = session();
        let b = session();

        lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap();
        lock.acquire(&coord, &b, request(LockMode::Shared)).unwrap();
        let snap = lock.snapshot();
        assert!(snap.writer.is_none());
        assert_eq!(snap.readers.len(), 2);
    }

    #[test]
    fn test_shared_twice_yields_one_grant() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap();
        lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap();
        assert_eq!(lock.snapshot().readers.len(), 1);

        lock.release(&coord, &a).unwrap();
        let snap = lock.snapshot();
        assert!(snap.readers.is_empty());
        assert!(matches!(
            lock.release(&coord, &a),
            Err(LockError::NotOwner { .. })
        ));
    }

    #[test]
    fn test_shared_while_holding_exclusive_is_noop() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        assert!(lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap());
        let snap = lock.snapshot();
        assert!(snap.writer.is_some());
        assert!(snap.readers.is_empty());
    }

    #[test]
    fn test_sole_reader_upgrades_in_place() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap();
        let grant = lock.snapshot().readers[0].grant;

        assert!(lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap());
        let snap = lock.snapshot();
        let writer = snap.writer.unwrap();
        assert_eq!(writer.grant, grant);
        assert_eq!(writer.mode, LockMode::Exclusive);
        assert!(snap.readers.is_empty());
        assert!(snap.waiters.is_empty());
    }

    #[test]
    fn test_unlock_by_non_owner() {
        let (coord, lock) = setup();
        let a = session();
        let b = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        let err = lock.release(&coord, &b).unwrap_err();
        assert_eq!(
            err,
            LockError::NotOwner {
                session: b.id(),
                lock: "test".to_string()
            }
        );
        assert!(lock.snapshot().writer.is_some());
    }

    #[test]
    fn test_reset_bypasses_ownership() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        lock.reset(&coord);
        assert!(lock.snapshot().writer.is_none());
        assert!(coord.enter().holders(lock.id()).is_empty());
        assert!(matches!(
            lock.release(&coord, &a),
            Err(LockError::NotOwner { .. })
        ));
        assert!(a.held_locks().is_empty());
    }

    #[test]
    fn test_timed_exclusive_expires_and_leaves_queue() {
        let (coord, lock) = setup();
        let a = session();
        let b = session();

        lock.acquire(&coord, &a, request(LockMode::Shared)).unwrap();
        let start = Instant::now();
        let granted = lock
            .acquire(&coord, &b, timed(LockMode::Exclusive, Duration::from_millis(50)))
            .unwrap();
        assert!(!granted);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(lock.queue_len(), 0);
        assert_eq!(coord.enter().pending(b.id()), None);
        assert!(b.held_locks().is_empty());
    }

    #[test]
    fn test_zero_timeout_fails_fast() {
        let (coord, lock) = setup();
        let a = session();
        let b = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        assert!(!lock
            .acquire(&coord, &b, timed(LockMode::Shared, Duration::ZERO))
            .unwrap());
        assert_eq!(lock.queue_len(), 0);
    }

    #[test]
    fn test_unrepresentable_timeout_waits_for_release() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let b = session();
                let granted = lock.acquire(&coord, &b, timed(LockMode::Exclusive, Duration::MAX));
                (b.id(), granted, b.held_locks())
            });

            while lock.queue_len() == 0 {
                thread::yield_now();
            }
            assert!(lock.snapshot().waiters[0].bounded);
            lock.release(&coord, &a).unwrap();

            let (b, granted, held) = waiter.join().unwrap();
            assert_eq!(granted, Ok(true));
            assert_eq!(held, vec![lock.id()]);
            assert_eq!(lock.snapshot().writer.unwrap().session, b);
            assert_eq!(lock.queue_len(), 0);
        });
    }

    #[test]
    fn test_pending_interrupt_fails_blocking_request() {
        let (coord, lock) = setup();
        let a = session();
        let b = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();
        b.interrupt();
        let err = lock
            .acquire(&coord, &b, request(LockMode::Exclusive))
            .unwrap_err();
        assert!(matches!(err, LockError::Interrupted { .. }));
        assert_eq!(lock.queue_len(), 0);
        assert!(!b.is_waiting());
    }

    #[test]
    fn test_release_hands_over_to_waiter() {
        let (coord, lock) = setup();
        let a = session();

        lock.acquire(&coord, &a, request(LockMode::Exclusive)).unwrap();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let b = session();
                let granted = lock.acquire(&coord, &b, request(LockMode::Exclusive));
                (b.id(), granted)
            });

            while lock.queue_len() == 0 {
                thread::yield_now();
            }
            lock.release(&coord, &a).unwrap();

            let (b, granted) = waiter.join().unwrap();
            assert_eq!(granted, Ok(true));
            assert_eq!(lock.snapshot().writer.unwrap().session, b);
            assert_eq!(coord.enter().pending(b), None);
        });
    }

    #[test]
    fn test_end_access_saturates() {
        let lock = NamedLock::new("count");
        assert_eq!(lock.begin_access(), 1);
        assert_eq!(lock.begin_access(), 2);
        assert_eq!(lock.end_access(), 1);
        assert_eq!(lock.end_access(), 0);
        assert_eq!(lock.end_access(), 0);
    }
}
