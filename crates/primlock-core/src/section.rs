//! Critical sections guarding lock and manager state
//!
//! A [`CriticalSection`] is a binary mutex around the state it protects. It
//! also keeps a count of threads currently parked in [`CriticalSection::enter`]
//! so contention is observable.
//!
//! Wake order among parked threads is whatever `parking_lot` provides: it is
//! eventually fair but not strict FIFO. Request ordering guarantees are built
//! on top of this, in the per-lock wait queues, never at this layer.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Binary mutex with blocked-thread accounting
pub struct CriticalSection<T> {
    inner: Mutex<T>,
    blocked: AtomicUsize,
}

impl<T> CriticalSection<T> {
    /// Create a new critical section guarding `value`
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            blocked: AtomicUsize::new(0),
        }
    }

    /// Enter the section, blocking until no other thread is inside it
    ///
    /// The section is left when the returned guard is dropped.
    pub fn enter(&self) -> SectionGuard<'_, T> {
        if let Some(guard) = self.inner.try_lock() {
            return SectionGuard { guard };
        }

        self.blocked.fetch_add(1, Ordering::AcqRel);
        let guard = self.inner.lock();
        self.blocked.fetch_sub(1, Ordering::AcqRel);
        SectionGuard { guard }
    }

    /// Number of threads currently parked waiting to enter
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::Acquire)
    }

    /// Whether some thread is currently inside the section
    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: Default> Default for CriticalSection<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Proof of being inside a [`CriticalSection`]
pub struct SectionGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> SectionGuard<'_, T> {
    /// Leave the section, park on `cond` and re-enter before returning
    ///
    /// The leave and the park happen atomically, so a notification sent by a
    /// thread that entered the section after us cannot be missed. Returns
    /// `true` if `deadline` passed before a notification arrived. Spurious
    /// wakeups are possible; callers re-check their condition.
    pub fn park(&mut self, cond: &Condvar, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => cond.wait_until(&mut self.guard, deadline).timed_out(),
            None => {
                cond.wait(&mut self.guard);
                false
            }
        }
    }
}

impl<T> Deref for SectionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SectionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_section_enter_leave() {
        let section = CriticalSection::new(0u32);
        {
            let mut guard = section.enter();
            *guard += 1;
            assert!(section.is_held());
        }
        assert!(!section.is_held());
        assert_eq!(*section.enter(), 1);
    }

    #[test]
    fn test_section_excludes_other_threads() {
        let section = Arc::new(CriticalSection::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let section = section.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        let mut guard = section.enter();
                        let len = guard.len();
                        guard.push(i * 100 + j);
                        assert_eq!(guard.len(), len + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(section.enter().len(), 800);
        assert_eq!(section.blocked(), 0);
    }

    #[test]
    fn test_park_times_out() {
        let section = CriticalSection::new(());
        let cond = Condvar::new();
        let mut guard = section.enter();
        let start = Instant::now();
        let timed_out = guard.park(&cond, Some(start + Duration::from_millis(20)));
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(section.is_held());
    }

    #[test]
    fn test_park_releases_section_while_parked() {
        let section = Arc::new(CriticalSection::new(false));
        let cond = Arc::new(Condvar::new());

        let waker = {
            let section = section.clone();
            let cond = cond.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                let mut guard = section.enter();
                *guard = true;
                cond.notify_one();
            })
        };

        let mut guard = section.enter();
        while !*guard {
            guard.park(&cond, None);
        }
        assert!(*guard);
        drop(guard);
        waker.join().unwrap();
    }
}
