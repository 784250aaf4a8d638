//! Common surface of named synchronization primitives
//!
//! Anything registered by name offers the same minimal contract: block until
//! available (optionally ranked, optionally bounded), reset, close. [`Lock`]
//! maps waiting onto exclusive acquisition.

use crate::error::LockResult;
use crate::handle::Lock;
use crate::wait::Rank;
use std::time::Duration;

/// A named primitive threads can wait on
pub trait Primitive {
    /// Registered name
    fn name(&self) -> &str;

    /// Whether the primitive was already registered when this handle was made
    fn already_exists(&self) -> bool;

    /// Block until the primitive is available
    fn wait(&self) -> LockResult<()>;

    /// Block until available or `timeout` passes; `Ok(false)` on timeout
    fn wait_timeout(&self, timeout: Duration) -> LockResult<bool>;

    /// Like [`wait`](Self::wait), queued at `rank`
    fn priority_wait(&self, rank: Rank) -> LockResult<()>;

    /// Like [`wait_timeout`](Self::wait_timeout), queued at `rank`
    fn priority_wait_timeout(&self, rank: Rank, timeout: Duration) -> LockResult<bool>;

    /// Return the primitive to its initial state
    fn reset(&self);

    /// Give up this handle
    fn close(self)
    where
        Self: Sized;
}

impl Primitive for Lock {
    fn name(&self) -> &str {
        Lock::name(self)
    }

    fn already_exists(&self) -> bool {
        Lock::already_exists(self)
    }

    fn wait(&self) -> LockResult<()> {
        self.wait_for()
    }

    fn wait_timeout(&self, timeout: Duration) -> LockResult<bool> {
        self.wait_for_timeout(timeout)
    }

    fn priority_wait(&self, rank: Rank) -> LockResult<()> {
        Lock::priority_wait(self, rank)
    }

    fn priority_wait_timeout(&self, rank: Rank, timeout: Duration) -> LockResult<bool> {
        Lock::priority_wait_timeout(self, rank, timeout)
    }

    fn reset(&self) {
        Lock::reset(self)
    }

    fn close(self) {
        Lock::close(self)
    }
}
