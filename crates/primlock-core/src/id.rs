//! Unique identifiers for locks, sessions and grants

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Generate a new process-unique id
            pub(crate) fn next() -> Self {
                $name($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Get the numeric ID value
            pub fn as_u64(self) -> u64 {
                self.0
            }

            /// Create an id from a raw u64 value
            pub fn from_u64(id: u64) -> Self {
                $name(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a named lock, stable for as long as the lock stays registered
    LockId,
    NEXT_LOCK_ID,
    "lock"
);

define_id!(
    /// Identifier of a per-thread session
    SessionId,
    NEXT_SESSION_ID,
    "session"
);

define_id!(
    /// Identifier of one grant (one session's hold on one lock)
    ///
    /// An in-place upgrade keeps the grant id; only the mode changes.
    GrantId,
    NEXT_GRANT_ID,
    "grant"
);
