//! Concurrency primitives for the scheduler and notifier mesh.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::element::Element;

/// A test-and-set spinlock.
///
/// Guards the short critical sections of the runtime (pending task lists,
/// timer sets, name databases during live operation). Critical sections must
/// not block or call back into locked structures.
pub struct Spinlock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: the lock serializes all access to `value`.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Creates a new unlocked spinlock around `value`.
    pub const fn new(value: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Spinlock::new(T::default())
    }
}

impl<T> Spinlock<T> {
    /// Acquires the lock, spinning until it is available.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinlockGuard { lock: self }
    }

    /// Acquires the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinlockGuard { lock: self })
        }
    }

    /// Consumes the lock, returning the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// RAII guard for [`Spinlock`]; releases on drop.
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A single-entry cell holding one element of a live router.
///
/// Element code runs under the discipline that at most one thread enters a
/// given element at a time: a push or pull chain, a task firing, a timer, or
/// a handler call. The cell enforces that discipline dynamically. Entering an
/// element that is already entered, from another thread or reentrantly from
/// the same call chain (a connection cycle with no queue in it), panics
/// rather than corrupting element state.
pub struct ElementCell {
    entered: AtomicBool,
    inner: UnsafeCell<Box<dyn Element>>,
}

// Safety: `entered` admits one thread at a time into `inner`, and panics
// instead of granting a second borrow.
unsafe impl Sync for ElementCell {}
unsafe impl Send for ElementCell {}

impl ElementCell {
    /// Wraps an element for placement in a router.
    pub fn new(element: Box<dyn Element>) -> Self {
        ElementCell {
            entered: AtomicBool::new(false),
            inner: UnsafeCell::new(element),
        }
    }

    /// Enters the element, running `f` with exclusive access.
    ///
    /// Panics if the element is already entered; configurations must break
    /// connection cycles with a queueing element.
    pub fn enter<R>(&self, f: impl FnOnce(&mut dyn Element) -> R) -> R {
        if self.entered.swap(true, Ordering::Acquire) {
            panic!("element entered twice: a connection cycle without a queue, or a thread misassignment");
        }
        let _leave = Leave(&self.entered);
        f(unsafe { &mut **self.inner.get() })
    }

    /// Consumes the cell, returning the boxed element.
    pub fn into_inner(self) -> Box<dyn Element> {
        self.inner.into_inner()
    }
}

struct Leave<'a>(&'a AtomicBool);

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn spinlock_serializes() {
        let lock = Arc::new(Spinlock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn try_lock_contended() {
        let lock = Spinlock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
