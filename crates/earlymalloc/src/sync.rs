use core::sync::atomic::{AtomicBool, Ordering};

/// Spins before each `sched_yield` while the lock is contended.
const SPIN_BUDGET: u32 = 128;

/// A test-and-set spinlock.
/// We cannot use std::sync::Mutex because it may allocate, and the arena must
/// be able to reset the lock in a forked child.
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl Send for RawSpinLock {}
unsafe impl Sync for RawSpinLock {}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        // Fast path: uncontended
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        let mut spins = 0u32;
        loop {
            // Wait on a plain load so contended cores share the cache line.
            while self.locked.load(Ordering::Relaxed) {
                if spins < SPIN_BUDGET {
                    spins += 1;
                    core::hint::spin_loop();
                } else {
                    spins = 0;
                    unsafe {
                        libc::sched_yield();
                    }
                }
            }
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Try to lock without spinning. Returns true if the lock was acquired.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock.
    ///
    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        debug_assert!(self.is_locked(), "unlock of an unlocked spinlock");
        self.locked.store(false, Ordering::Release);
    }

    /// Reset the lock to unlocked regardless of who holds it.
    ///
    /// # Safety
    /// Only sound when no other thread can be inside the critical section,
    /// i.e. in the single-threaded child right after fork().
    #[inline]
    pub unsafe fn force_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Lock and return a guard that unlocks on drop.
    #[inline]
    pub fn guard(&self) -> SpinGuard<'_> {
        self.lock();
        SpinGuard { lock: self }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinGuard<'a> {
    lock: &'a RawSpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: a guard only exists while its lock is held.
        unsafe { self.lock.unlock() };
    }
}
