//! Cross-lock wait-for graph and deadlock detection
//!
//! The graph mirrors, for every lock, which sessions currently hold it, and
//! for every session, which lock it is queued on. Edges are implicit: a
//! session pending on lock `L` waits for every holder of `L`.
//!
//! The graph lives inside the manager's global critical section. It is only
//! ever updated while the caller is also inside the critical section of the
//! lock whose holders or queue changed, so the mirror and the lock state move
//! together.

use crate::id::{LockId, SessionId};
use crate::section::{CriticalSection, SectionGuard};
use rustc_hash::{FxHashMap, FxHashSet};

/// The lock a session is queued on
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PendingWait {
    pub(crate) lock: LockId,
    /// Timed waits resolve on their own and are not followed
    pub(crate) bounded: bool,
}

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    holders: FxHashMap<LockId, Vec<SessionId>>,
    pending: FxHashMap<SessionId, PendingWait>,
}

impl WaitGraph {
    pub(crate) fn set_holders(&mut self, lock: LockId, holders: Vec<SessionId>) {
        if holders.is_empty() {
            self.holders.remove(&lock);
        } else {
            self.holders.insert(lock, holders);
        }
    }

    pub(crate) fn holders(&self, lock: LockId) -> &[SessionId] {
        self.holders.get(&lock).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn forget_lock(&mut self, lock: LockId) {
        self.holders.remove(&lock);
    }

    pub(crate) fn set_pending(&mut self, session: SessionId, wait: PendingWait) {
        self.pending.insert(session, wait);
    }

    pub(crate) fn clear_pending(&mut self, session: SessionId) {
        self.pending.remove(&session);
    }

    pub(crate) fn pending(&self, session: SessionId) -> Option<PendingWait> {
        self.pending.get(&session).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.holders.clear();
        self.pending.clear();
    }

    /// Find a wait-for cycle that `requester` would close by waiting on `lock`
    ///
    /// Starts at the holders of `lock` and follows each holder's own pending
    /// wait. Returns the sessions on the first cycle found, starting and
    /// ending with `requester`.
    pub(crate) fn find_cycle(&self, requester: SessionId, lock: LockId) -> Option<Vec<SessionId>> {
        let mut visited = FxHashSet::default();
        let mut path = vec![requester];
        if self.walk(requester, lock, requester, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk(
        &self,
        requester: SessionId,
        lock: LockId,
        waiter: SessionId,
        visited: &mut FxHashSet<SessionId>,
        path: &mut Vec<SessionId>,
    ) -> bool {
        for &holder in self.holders(lock) {
            // A session never waits on its own grant (upgrades)
            if holder == waiter {
                continue;
            }
            if holder == requester {
                path.push(holder);
                return true;
            }
            if !visited.insert(holder) {
                continue;
            }
            let Some(next) = self.pending(holder) else {
                continue;
            };
            if next.bounded {
                continue;
            }
            path.push(holder);
            if self.walk(requester, next.lock, holder, visited, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}

/// The manager's global critical section and the policy applied inside it
pub(crate) struct Coordinator {
    section: CriticalSection<WaitGraph>,
    detect_deadlocks: bool,
}

impl Coordinator {
    pub(crate) fn new(detect_deadlocks: bool) -> Self {
        Self {
            section: CriticalSection::default(),
            detect_deadlocks,
        }
    }

    pub(crate) fn enter(&self) -> SectionGuard<'_, WaitGraph> {
        self.section.enter()
    }

    pub(crate) fn detects_deadlocks(&self) -> bool {
        self.detect_deadlocks
    }
}
