//! Spinlock guarding short critical sections (generator seeds, provider tables).
//! Nothing may block on the device while holding it.

use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

// Standard spinlock, but will panic if it fails to lock after more than N tries
pub struct Mutex<T, const N: usize> {
    data: UnsafeCell<T>,
    lock: AtomicBool,
}

pub struct MutexGuard<'a, T: 'a> {
    lock: &'a AtomicBool,
    data: &'a UnsafeCell<T>,
}

unsafe impl<T: Send, const N: usize> Sync for Mutex<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Mutex<T, N> {}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T, const N: usize> Mutex<T, N> {
    pub const fn new(data: T) -> Self {
        Self { data: UnsafeCell::new(data), lock: AtomicBool::new(false) }
    }

    #[inline(always)]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let mut i = 0;
        loop {
            if self.lock.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok() {
                return MutexGuard { lock: &self.lock, data: &self.data };
            }
            while self.lock.load(Ordering::Relaxed) {
                core::hint::spin_loop();
                i += 1;
                if i > N {
                    panic!("Failed to lock mutex after {N} tries. Panicking in order to avoid deadlock.");
                }
            }
        }
    }
}

impl<T, const N: usize> std::fmt::Debug for Mutex<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex").field("locked", &self.lock.load(Ordering::Relaxed)).finish_non_exhaustive()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::Mutex;
    use std::sync::Arc;

    #[test]
    fn lock_serializes_increments() {
        let counter = Arc::new(Mutex::<u64, 100_000_000>::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }
}
