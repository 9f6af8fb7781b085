// =============================================================================
// mpsvc — Try-Acquire Spinlock
// =============================================================================
//
// Every core record is guarded by one of these. There is no OS underneath,
// so there is nothing to block on: acquisition is a try-lock retried in a
// loop, with a caller-supplied relax hint (PAUSE on hardware, a thread yield
// under the host test harness) between attempts.
//
// HOW IT WORKS:
//   - Two counters, `next_ticket` and `now_serving`, equal while the lock is
//     free. Nobody ever waits in line: there is no queue of tickets.
//   - try_lock: load `now_serving` (Acquire, pairs with the Release in
//     unlock), then compare-exchange `next_ticket` from that value to one
//     past it. Success means the lock was free and is now ours.
//   - unlock: increment `now_serving` (Release), making the pair equal again.
//
// WHY NOT A BLOCKING ACQUIRE?
//   A secondary whose physical core hangs would never hand a queued ticket
//   back, so a FIFO `lock()` that takes a ticket up front could wedge the
//   primary forever. A failed try-lock leaves no trace, so the primary can
//   always give up on a record after its deadline.
//
// INTERRUPTS:
//   Boot-time cores run with interrupts masked, and the supervision timer
//   callback never touches a record lock from inside a held critical
//   section, so the lock does not save or restore the interrupt flag.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A test-and-set spinlock acquired by polling.
///
/// # Type Parameter
/// - `T`: The data protected by the lock. Must be `Send` because ownership
///   effectively transfers between cores when the lock is acquired.
pub struct SpinLock<T> {
    /// One past `now_serving` while held, equal to it while free.
    next_ticket: AtomicU32,

    /// Incremented on unlock.
    now_serving: AtomicU32,

    /// The protected data.
    data: UnsafeCell<T>,
}

// SAFETY: the lock ensures that only one core accesses T at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new, unlocked spinlock wrapping the given value.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `Some(guard)` if the lock was immediately available,
    /// or `None` if the lock is currently held by another core.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        // Acquire so the previous holder's writes are visible once we win.
        let current = self.now_serving.load(Ordering::Acquire);
        self.next_ticket
            .compare_exchange(current, current.wrapping_add(1), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Acquires the lock, calling `relax` after every failed attempt.
    pub fn lock_with(&self, relax: impl Fn()) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            relax();
        }
    }

    /// Acquires the lock using the CPU's spin-loop hint between attempts.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock_with(core::hint::spin_loop)
    }

    /// Whether some core currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// `&mut self` guarantees exclusive access at compile time, so no lock
    /// is needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held spinlock. Dropping it releases the lock.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release ordering publishes our writes to the next holder.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}
