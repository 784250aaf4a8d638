//! Point-in-time views of manager state for diagnostics

use crate::id::{GrantId, LockId, SessionId};
use crate::wait::{LockMode, Rank};
use serde::Serialize;

/// A granted hold on a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantSnapshot {
    /// Grant id (kept across an in-place upgrade)
    pub grant: GrantId,
    /// Holding session
    pub session: SessionId,
    /// Current mode
    pub mode: LockMode,
}

/// A queued request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaiterSnapshot {
    /// Requesting session
    pub session: SessionId,
    /// Requested mode
    pub mode: LockMode,
    /// Requested rank
    pub rank: Rank,
    /// Whether the request carries a timeout
    pub bounded: bool,
}

/// State of one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    /// Lock id
    pub id: LockId,
    /// Lock name
    pub name: String,
    /// Open handles
    pub access_count: usize,
    /// Exclusive holder, if any
    pub writer: Option<GrantSnapshot>,
    /// Shared holders
    pub readers: Vec<GrantSnapshot>,
    /// Queued requests in service order
    pub waiters: Vec<WaiterSnapshot>,
}

impl LockSnapshot {
    /// Whether no session holds the lock
    pub fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// State of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Session id
    pub id: SessionId,
    /// Locks the session has recorded grants on
    pub held: Vec<LockId>,
    /// Lock the session is queued on, if any
    pub waiting_on: Option<LockId>,
}

/// State of a whole manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerSnapshot {
    /// Registered locks, ordered by id
    pub locks: Vec<LockSnapshot>,
    /// Live sessions, ordered by id
    pub sessions: Vec<SessionSnapshot>,
}

impl ManagerSnapshot {
    /// Find a lock by name
    pub fn lock(&self, name: &str) -> Option<&LockSnapshot> {
        self.locks.iter().find(|lock| lock.name == name)
    }

    /// Number of queued requests across all locks
    pub fn waiting(&self) -> usize {
        self.locks.iter().map(|lock| lock.waiters.len()).sum()
    }
}
