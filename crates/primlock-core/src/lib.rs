//! Primlock Core
//!
//! Named shared/exclusive locks for threads of one process:
//! - Locks registered by name and reference-counted by open handles
//! - Shared (reader) and exclusive (writer) grants, with in-place upgrade of
//!   a sole reader
//! - Waiters served by rank, then arrival order
//! - Deadlock detection over the wait-for graph for untimed requests
//! - Timed requests, interruption of parked sessions, forced reset
//!
//! ```
//! use primlock_core::LockManager;
//!
//! let manager = LockManager::default();
//! let lock = manager.create_lock("jobs").unwrap();
//! {
//!     let _guard = lock.exclusive_guard().unwrap();
//!     // exclusive access here
//! }
//! assert!(lock.snapshot().is_free());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod guard;
pub mod handle;
pub mod id;
pub mod manager;
pub mod options;
pub mod primitive;
pub mod section;
pub mod session;
pub mod snapshot;
pub mod wait;

mod graph;
mod lock;

pub use error::{LockError, LockResult};
pub use guard::LockGuard;
pub use handle::Lock;
pub use id::{GrantId, LockId, SessionId};
pub use manager::LockManager;
pub use options::ManagerOptions;
pub use primitive::Primitive;
pub use section::{CriticalSection, SectionGuard};
pub use session::Session;
pub use snapshot::{GrantSnapshot, LockSnapshot, ManagerSnapshot, SessionSnapshot, WaiterSnapshot};
pub use wait::{LockMode, Rank};
