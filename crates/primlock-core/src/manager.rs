//! Lock manager: registries of locks and sessions
//!
//! Locks are registered by name and by id and reference-counted by the
//! handles open on them; the last close removes them from both maps.
//! Sessions are registered by thread.
//!
//! Exclusion domains, always taken in this order and never reversed:
//!
//! 1. a lock's own critical section
//! 2. the global critical section holding the wait-for graph
//! 3. the registry mutex guarding the maps below
//!
//! The registry mutex is never held while entering either critical section.

use crate::error::{LockError, LockResult};
use crate::graph::Coordinator;
use crate::handle::Lock;
use crate::id::LockId;
use crate::lock::NamedLock;
use crate::options::ManagerOptions;
use crate::session::Session;
use crate::snapshot::{ManagerSnapshot, SessionSnapshot};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

struct Registry {
    by_name: FxHashMap<String, Arc<NamedLock>>,
    by_id: FxHashMap<LockId, Arc<NamedLock>>,
    sessions: FxHashMap<ThreadId, Arc<Session>>,
}

impl Registry {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            by_name: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            by_id: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            sessions: FxHashMap::default(),
        }
    }

    /// Get or create a lock by name; the flag tells whether it already existed
    fn get_or_create(&mut self, name: &str) -> (Arc<NamedLock>, bool) {
        if let Some(lock) = self.by_name.get(name) {
            return (lock.clone(), true);
        }
        let lock = Arc::new(NamedLock::new(name));
        self.by_name.insert(name.to_string(), lock.clone());
        self.by_id.insert(lock.id(), lock.clone());
        (lock, false)
    }

    fn remove(&mut self, lock: &NamedLock) {
        self.by_id.remove(&lock.id());
        if self
            .by_name
            .get(lock.name())
            .is_some_and(|registered| registered.id() == lock.id())
        {
            self.by_name.remove(lock.name());
        }
    }
}

struct Shared {
    options: ManagerOptions,
    coordinator: Coordinator,
    registry: Mutex<Registry>,
    shut_down: AtomicBool,
}

/// Registry of named locks and per-thread sessions
///
/// Cloning is cheap and yields a handle to the same manager.
#[derive(Clone)]
pub struct LockManager {
    shared: Arc<Shared>,
}

impl LockManager {
    /// Create a new manager
    pub fn new(options: ManagerOptions) -> Self {
        let registry = Registry::with_capacity(options.registry_capacity);
        Self {
            shared: Arc::new(Shared {
                coordinator: Coordinator::new(options.deadlock_detection),
                options,
                registry: Mutex::new(registry),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// The options this manager was created with
    pub fn options(&self) -> &ManagerOptions {
        &self.shared.options
    }

    pub(crate) fn coordinator(&self) -> &Coordinator {
        &self.shared.coordinator
    }

    /// The calling thread's session, created on first use
    ///
    /// Sessions are keyed by `ThreadId`, which is never reused. A thread that
    /// exits without calling [`close_session`](Self::close_session) leaves its
    /// session, with any grants and open references it still has, registered
    /// until [`shutdown`](Self::shutdown).
    pub fn session(&self) -> Arc<Session> {
        let thread = thread::current().id();
        let mut registry = self.shared.registry.lock();
        let registry_len = registry.sessions.len();
        registry
            .sessions
            .entry(thread)
            .or_insert_with(|| {
                let session = Arc::new(Session::new(thread));
                tracing::debug!(
                    session = %session.id(),
                    ?thread,
                    live = registry_len + 1,
                    "session created"
                );
                session
            })
            .clone()
    }

    /// Create the named lock, or open it if it already exists
    ///
    /// [`Lock::already_exists`] tells which happened.
    pub fn create_lock(&self, name: &str) -> LockResult<Lock> {
        if self.is_shut_down() {
            return Err(LockError::ShutDown);
        }
        let session = self.session();
        let (lock, existed) = {
            let mut registry = self.shared.registry.lock();
            let (lock, existed) = registry.get_or_create(name);
            lock.begin_access();
            (lock, existed)
        };
        if !existed {
            tracing::debug!(lock = %name, id = %lock.id(), "lock created");
        }
        session.note_opened(lock.id());
        Ok(Lock::new(self.clone(), lock, session, existed))
    }

    /// Open an existing lock by name
    pub fn open_lock(&self, name: &str) -> Option<Lock> {
        let lock = {
            let registry = self.shared.registry.lock();
            let lock = registry.by_name.get(name)?.clone();
            lock.begin_access();
            lock
        };
        Some(self.opened(lock))
    }

    /// Open an existing lock by id
    pub fn open_lock_by_id(&self, id: LockId) -> Option<Lock> {
        let lock = {
            let registry = self.shared.registry.lock();
            let lock = registry.by_id.get(&id)?.clone();
            lock.begin_access();
            lock
        };
        Some(self.opened(lock))
    }

    fn opened(&self, lock: Arc<NamedLock>) -> Lock {
        let session = self.session();
        session.note_opened(lock.id());
        Lock::new(self.clone(), lock, session, true)
    }

    fn resolve(&self, id: LockId) -> Option<Arc<NamedLock>> {
        self.shared.registry.lock().by_id.get(&id).cloned()
    }

    /// Release one open reference; the last one removes the lock
    pub(crate) fn end_access(&self, id: LockId) {
        let removed = {
            let mut registry = self.shared.registry.lock();
            let Some(lock) = registry.by_id.get(&id).cloned() else {
                return;
            };
            if lock.end_access() > 0 {
                return;
            }
            registry.remove(&lock);
            lock
        };
        self.shared.coordinator.enter().forget_lock(id);
        tracing::debug!(lock = %removed.name(), id = %id, "lock removed");
    }

    /// Close the calling thread's session
    ///
    /// Releases every grant it still holds and every lock it opened. Grants
    /// that were already cleared by a reset are skipped. Threads that use the
    /// manager should call this before exiting; nothing else removes their
    /// session short of [`shutdown`](Self::shutdown).
    pub fn close_session(&self) {
        let thread = thread::current().id();
        let session = self.shared.registry.lock().sessions.remove(&thread);
        if let Some(session) = session {
            self.teardown(&session);
        }
    }

    fn teardown(&self, session: &Session) {
        for id in session.take_grants() {
            let Some(lock) = self.resolve(id) else {
                continue;
            };
            if let Err(err) = lock.release(self.coordinator(), session) {
                tracing::debug!(session = %session.id(), %err, "grant already gone");
            }
        }
        for id in session.take_opened() {
            self.end_access(id);
        }
        tracing::debug!(session = %session.id(), "session closed");
    }

    /// Tear the manager down
    ///
    /// Interrupts every parked session, closes every session and forgets every
    /// lock. Later [`create_lock`](Self::create_lock) calls fail with
    /// [`LockError::ShutDown`].
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Arc<Session>> = {
            let mut registry = self.shared.registry.lock();
            registry.sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &sessions {
            session.interrupt();
        }
        for session in &sessions {
            self.teardown(session);
        }

        let locks = {
            let mut registry = self.shared.registry.lock();
            registry.by_name.clear();
            registry.by_id.drain().count()
        };
        self.shared.coordinator.enter().clear();
        tracing::info!(sessions = sessions.len(), locks, "lock manager shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Number of registered locks
    pub fn lock_count(&self) -> usize {
        self.shared.registry.lock().by_id.len()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.shared.registry.lock().sessions.len()
    }

    /// Capture the state of every lock and session
    pub fn snapshot(&self) -> ManagerSnapshot {
        let (locks, sessions) = {
            let registry = self.shared.registry.lock();
            let locks: Vec<Arc<NamedLock>> = registry.by_id.values().cloned().collect();
            let sessions: Vec<Arc<Session>> = registry.sessions.values().cloned().collect();
            (locks, sessions)
        };

        let mut lock_snapshots: Vec<_> = locks.iter().map(|lock| lock.snapshot()).collect();
        lock_snapshots.sort_by_key(|lock| lock.id);

        let mut session_snapshots: Vec<_> = {
            let graph = self.coordinator().enter();
            sessions
                .iter()
                .map(|session| SessionSnapshot {
                    id: session.id(),
                    held: session.held_locks(),
                    waiting_on: graph.pending(session.id()).map(|wait| wait.lock),
                })
                .collect()
        };
        session_snapshots.sort_by_key(|session| session.id);

        ManagerSnapshot {
            locks: lock_snapshots,
            sessions: session_snapshots,
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("options", &self.shared.options)
            .field("locks", &self.lock_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}
