//! Lock manager errors

use crate::id::SessionId;

/// Errors that can occur when using a lock
///
/// A timed-out request is not an error: the timed variants return `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Waiting for the lock would close a wait-for cycle
    ///
    /// Raised before the request is queued, never while it is already waiting.
    #[error("deadlock: {requester} waiting for lock {lock:?} would close cycle {}", format_cycle(.cycle))]
    Deadlock {
        /// Name of the requested lock
        lock: String,
        /// Session that made the request
        requester: SessionId,
        /// Sessions on the cycle, starting and ending with the requester
        cycle: Vec<SessionId>,
    },

    /// Unlock called by a session holding no grant on the lock
    #[error("{session} does not own lock {lock:?}")]
    NotOwner {
        /// Session that called unlock
        session: SessionId,
        /// Name of the lock
        lock: String,
    },

    /// The session was interrupted while waiting for the lock
    #[error("{session} interrupted while waiting for lock {lock:?}")]
    Interrupted {
        /// Interrupted session
        session: SessionId,
        /// Name of the lock being waited for
        lock: String,
    },

    /// The manager has been shut down
    #[error("lock manager has been shut down")]
    ShutDown,
}

/// Lock operation result
pub type LockResult<T> = Result<T, LockError>;

fn format_cycle(cycle: &[SessionId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
