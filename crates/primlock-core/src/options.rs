//! Lock manager configuration

use crate::wait::Rank;

/// Options for a [`LockManager`](crate::LockManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Refuse untimed requests that would close a wait-for cycle
    ///
    /// With detection off, such requests wait forever.
    pub deadlock_detection: bool,

    /// Rank used by the non-priority lock variants
    pub default_rank: Rank,

    /// Initial capacity of the name and id registries
    pub registry_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            deadlock_detection: true,
            default_rank: 0,
            registry_capacity: 64,
        }
    }
}

impl ManagerOptions {
    /// Enable or disable deadlock detection
    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    /// Set the rank used by the non-priority variants
    pub fn with_default_rank(mut self, rank: Rank) -> Self {
        self.default_rank = rank;
        self
    }

    /// Set the initial registry capacity
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }
}
