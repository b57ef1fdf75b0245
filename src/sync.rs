// Interrupt-Safe Locking Primitives
//
// The kernel uses a two-level locking discipline. The per-CPU `IrqMutex`
// masks interrupts while held and nests; any spinlock that may be taken
// from interrupt context is wrapped in an `IrqSpinlock`, whose acquire
// raises the IRQ mutex before taking the spinlock and whose release
// reverses both steps.
//
// Lock order is fixed across the kernel (platform, then allocator, then
// universe, then channel, then hub); every shared mutable structure has
// exactly one lock and is mutated only under it.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::mutex::{SpinMutex, SpinMutexGuard};

use crate::arch;

/// Per-CPU interrupt mutex. Locking masks interrupts; the mutex nests, and
/// the pre-lock interrupt flag is restored when the outermost guard drops.
pub struct IrqMutex {
    depth: AtomicUsize,
    was_enabled: AtomicBool,
}

impl IrqMutex {
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            was_enabled: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        let enabled = arch::irqs_enabled();
        arch::disable_irqs();
        if self.depth.load(Ordering::Relaxed) == 0 {
            self.was_enabled.store(enabled, Ordering::Relaxed);
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unlock(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed);
        assert!(depth > 0, "IrqMutex underflow");
        if depth == 1 && self.was_enabled.load(Ordering::Relaxed) {
            arch::enable_irqs();
        }
    }

    pub fn nesting(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

static IRQ_MUTEX: IrqMutex = IrqMutex::new();

pub fn irq_mutex() -> &'static IrqMutex {
    &IRQ_MUTEX
}

/// Runs a closure with interrupts masked.
#[inline]
pub fn without_irqs<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    irq_mutex().lock();
    let result = f();
    irq_mutex().unlock();
    result
}

/// A spinlock that is safe to take from interrupt context: acquisition
/// raises the IRQ mutex first, so the holder cannot be interrupted and
/// re-enter itself.
pub struct IrqSpinlock<T> {
    inner: SpinMutex<T>,
}

impl<T: core::fmt::Debug> core::fmt::Debug for IrqSpinlock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqSpinlock").field("inner", &self.inner).finish()
    }
}

impl<T> IrqSpinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinMutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqSpinlockGuard<'_, T> {
        irq_mutex().lock();
        IrqSpinlockGuard {
            guard: Some(self.inner.lock()),
        }
    }
}

pub struct IrqSpinlockGuard<'a, T> {
    guard: Option<SpinMutexGuard<'a, T>>,
}

impl<T> Deref for IrqSpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> DerefMut for IrqSpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<T> Drop for IrqSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the spinlock before lowering the IRQ mutex.
        self.guard = None;
        irq_mutex().unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_mutex_nests() {
        let mutex = IrqMutex::new();
        mutex.lock();
        mutex.lock();
        assert_eq!(mutex.nesting(), 2);
        mutex.unlock();
        assert_eq!(mutex.nesting(), 1);
        mutex.unlock();
        assert_eq!(mutex.nesting(), 0);
    }

    #[test]
    fn spinlock_guards_value() {
        let lock = IrqSpinlock::new(7u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn without_irqs_returns_closure_result() {
        let value = without_irqs(|| 41 + 1);
        assert_eq!(value, 42);
    }
}
