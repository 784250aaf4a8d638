//! Wait objects and the rank-ordered wait queue
//!
//! Every request that cannot be granted immediately becomes a [`WaitObject`]
//! in its lock's [`WaitQueue`]. The queue is serviced from the front: lowest
//! rank first, arrival order within equal ranks. Entries are keyed by
//! `(rank, sequence)`, which gives exactly that order without splicing links.

use crate::id::{LockId, SessionId};
use parking_lot::Condvar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-supplied priority; lower ranks are serviced first
pub type Rank = i32;

/// Access mode of a grant or request
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Compatible with other shared holders
    Shared,
    /// Excludes every other holder
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Position of a wait object in its queue
pub(crate) type QueueKey = (Rank, u64);

/// One blocked request
///
/// Doubles as the requesting session's vertex in the wait-for graph while it
/// is queued. The condvar is only ever used together with the owning lock's
/// critical section.
pub(crate) struct WaitObject {
    key: QueueKey,
    lock: LockId,
    session: SessionId,
    mode: LockMode,
    bounded: bool,
    signaled: AtomicBool,
    cond: Condvar,
}

impl WaitObject {
    pub(crate) fn key(&self) -> QueueKey {
        self.key
    }

    pub(crate) fn rank(&self) -> Rank {
        self.key.0
    }

    pub(crate) fn lock(&self) -> LockId {
        self.lock
    }

    pub(crate) fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether the request carries a timeout
    pub(crate) fn is_bounded(&self) -> bool {
        self.bounded
    }

    pub(crate) fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    pub(crate) fn condvar(&self) -> &Condvar {
        &self.cond
    }

    /// Mark the request granted and wake its thread
    ///
    /// Must be called inside the owning lock's critical section.
    pub(crate) fn notify(&self) {
        self.signaled.store(true, Ordering::Release);
        self.cond.notify_one();
    }

    /// Wake the parked thread without granting anything
    pub(crate) fn wake(&self) {
        self.cond.notify_all();
    }
}

impl fmt::Debug for WaitObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitObject")
            .field("rank", &self.key.0)
            .field("seq", &self.key.1)
            .field("lock", &self.lock)
            .field("session", &self.session)
            .field("mode", &self.mode)
            .field("bounded", &self.bounded)
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// Priority queue of blocked requests for one lock
#[derive(Debug)]
pub(crate) struct WaitQueue {
    lock: LockId,
    entries: BTreeMap<QueueKey, Arc<WaitObject>>,
    next_seq: u64,
}

impl WaitQueue {
    pub(crate) fn new(lock: LockId) -> Self {
        Self {
            lock,
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Queue a request behind every entry of lower or equal rank
    pub(crate) fn enqueue(
        &mut self,
        session: SessionId,
        mode: LockMode,
        rank: Rank,
        bounded: bool,
    ) -> Arc<WaitObject> {
        let key = (rank, self.next_seq);
        self.next_seq += 1;
        let waiter = Arc::new(WaitObject {
            key,
            lock: self.lock,
            session,
            mode,
            bounded,
            signaled: AtomicBool::new(false),
            cond: Condvar::new(),
        });
        self.entries.insert(key, waiter.clone());
        waiter
    }

    /// Next request to service
    pub(crate) fn front(&self) -> Option<&Arc<WaitObject>> {
        self.entries.values().next()
    }

    pub(crate) fn pop_front(&mut self) -> Option<Arc<WaitObject>> {
        self.entries.pop_first().map(|(_, waiter)| waiter)
    }

    /// Unlink a request; returns false if it was no longer queued
    pub(crate) fn remove(&mut self, waiter: &WaitObject) -> bool {
        self.entries.remove(&waiter.key()).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Requests in service order
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<WaitObject>> {
        self.entries.values()
    }
}
