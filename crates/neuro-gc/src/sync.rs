//! Writer-priority many-readers-one-writer synchronization.
//!
//! The indirection table serves a stream of shared-mode record writes from
//! mutator threads and a rare exclusive-mode page-array growth. A standard
//! shared mutex gives no fairness guarantee towards the writer, so the table
//! uses a [`ReverseSemaphore`]: the moment a writer queues up, new shared
//! acquisitions block until the writer has entered and left its critical
//! section.

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Condvar, Mutex, RawMutex};

/// Shared/exclusive state behind the sync mutex.
struct State {
    /// Number of threads currently holding shared access. Shared recursion
    /// by one thread counts once per acquisition.
    shared_users: usize,
    /// Set while a writer is queued or active.
    exclusive_requested: bool,
}

/// A writer-priority readers/writer lock.
///
/// Contract:
/// - `lock_shared` blocks while any writer is queued or active.
/// - `lock` blocks until all shared users release, and prevents further
///   shared acquisitions while waiting.
/// - Shared acquisitions may recurse on the same thread; each acquisition
///   needs a matching release (the guard handles this).
///
/// Writers serialize on a dedicated mutex so at most one writer at a time
/// owns the exclusive-requested flag.
pub struct ReverseSemaphore {
    sync: Mutex<State>,
    notif: Condvar,
    /// Queues writers; held for the whole exclusive critical section.
    exclusive: RawMutex,
}

impl Default for ReverseSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReverseSemaphore {
    /// Creates an unlocked semaphore.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sync: Mutex::new(State {
                shared_users: 0,
                exclusive_requested: false,
            }),
            notif: Condvar::new(),
            exclusive: RawMutex::INIT,
        }
    }

    /// Acquires shared access, blocking while a writer is queued or active.
    pub fn lock_shared(&self) -> SharedGuard<'_> {
        let mut state = self.sync.lock();
        while state.exclusive_requested {
            self.notif.wait(&mut state);
        }
        state.shared_users += 1;
        SharedGuard { sem: self }
    }

    /// Attempts to acquire shared access without blocking.
    pub fn try_lock_shared(&self) -> Option<SharedGuard<'_>> {
        let mut state = self.sync.try_lock()?;
        if state.exclusive_requested {
            return None;
        }
        state.shared_users += 1;
        Some(SharedGuard { sem: self })
    }

    /// Acquires exclusive access.
    ///
    /// Queues behind any active writer, then flags the exclusive request so
    /// no new shared users can enter, then waits for the shared count to
    /// drain to zero.
    pub fn lock(&self) -> ExclusiveGuard<'_> {
        self.exclusive.lock();
        let mut state = self.sync.lock();
        state.exclusive_requested = true;
        while state.shared_users > 0 {
            self.notif.wait(&mut state);
        }
        ExclusiveGuard { sem: self }
    }

    /// Attempts to acquire exclusive access without blocking.
    pub fn try_lock(&self) -> Option<ExclusiveGuard<'_>> {
        let mut state = self.sync.try_lock()?;
        if !self.exclusive.try_lock() {
            return None;
        }
        if state.shared_users > 0 {
            // SAFETY: acquired just above on this same code path.
            unsafe { self.exclusive.unlock() };
            return None;
        }
        state.exclusive_requested = true;
        Some(ExclusiveGuard { sem: self })
    }

    fn unlock_shared(&self) {
        let mut state = self.sync.lock();
        debug_assert!(state.shared_users > 0, "unbalanced shared release");
        state.shared_users -= 1;
        drop(state);
        self.notif.notify_all();
    }

    fn unlock_exclusive(&self) {
        let mut state = self.sync.lock();
        state.exclusive_requested = false;
        // SAFETY: the exclusive mutex is held by the guard being dropped.
        unsafe { self.exclusive.unlock() };
        drop(state);
        self.notif.notify_all();
    }
}

/// RAII guard for a shared acquisition.
pub struct SharedGuard<'a> {
    sem: &'a ReverseSemaphore,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.sem.unlock_shared();
    }
}

/// RAII guard for an exclusive acquisition.
pub struct ExclusiveGuard<'a> {
    sem: &'a ReverseSemaphore,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.sem.unlock_exclusive();
    }
}
