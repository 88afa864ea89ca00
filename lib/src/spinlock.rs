//! Non-reentrant spinlock with interrupt-disable nesting.
//!
//! Acquiring a lock enters a `push_off` region before spinning, so an
//! interrupt handler on the same hart can never spin on a lock its own hart
//! holds. Releasing leaves the region after the release store.
//!
//! A guard may be carried across a context switch: the side giving up the
//! hart calls [`SpinlockGuard::handoff`] and the side that resumes on the
//! same hart calls [`Spinlock::adopt`]. The lock stays held in between.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cpu::{Backoff, pop_off, push_off};
use crate::percpu::current_cpu_id;

const NO_OWNER: usize = usize::MAX;

pub struct Spinlock<T> {
    locked: AtomicBool,
    /// Hart (or detached thread id) holding the lock, for `holding` checks.
    owner: AtomicUsize,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `locked`, which is only taken
// with interrupts disabled on the acquiring hart.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    _not_send: PhantomData<*mut ()>,
}

impl<T> Spinlock<T> {
    #[inline]
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
            name,
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check if the lock is currently held by anyone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Whether the calling hart holds this lock. Only meaningful inside a
    /// `push_off` region.
    #[inline]
    pub fn holding(&self) -> bool {
        self.is_locked() && self.owner.load(Ordering::Relaxed) == current_cpu_id()
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        push_off();
        if self.holding() {
            panic!("acquire: {} already held by cpu {}", self.name, current_cpu_id());
        }

        let mut backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.relax();
        }
        self.owner.store(current_cpu_id(), Ordering::Relaxed);

        SpinlockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        push_off();
        if self.holding() {
            panic!("acquire: {} already held by cpu {}", self.name, current_cpu_id());
        }

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.owner.store(current_cpu_id(), Ordering::Relaxed);
            Some(SpinlockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            pop_off();
            None
        }
    }

    /// Re-materialize the guard for a lock that was handed off to this hart.
    ///
    /// # Safety
    /// The previous guard must have been consumed with
    /// [`SpinlockGuard::handoff`], and no other guard for this acquisition
    /// may exist.
    pub unsafe fn adopt(&self) -> SpinlockGuard<'_, T> {
        if !self.holding() {
            panic!("adopt: {} not held by cpu {}", self.name, current_cpu_id());
        }
        SpinlockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release(&self) {
        if !self.holding() {
            panic!("release: {} not held by cpu {}", self.name, current_cpu_id());
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        pop_off();
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self::new("anon", T::default())
    }
}

impl<T> fmt::Debug for Spinlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl<'a, T> SpinlockGuard<'a, T> {
    /// The lock this guard holds.
    #[inline]
    pub fn spinlock(&self) -> &'a Spinlock<T> {
        self.lock
    }

    /// Release the lock and hand back a reference for re-acquiring it later.
    #[inline]
    pub fn unlock(self) -> &'a Spinlock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }

    /// Give up the guard without releasing the lock. The hart that resumes
    /// next takes it over with [`Spinlock::adopt`].
    #[inline]
    pub fn handoff(self) {
        core::mem::forget(self);
    }
}

impl<'a, T> Deref for SpinlockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinlockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{are_interrupts_enabled, enable_interrupts};
    use crate::percpu::get_percpu_data;
    use core::hint::spin_loop;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn counter_survives_contention() {
        const THREADS: usize = 4;
        const ROUNDS: u64 = 20_000;
        let counter = Arc::new(Spinlock::new("counter", 0u64));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let mut guard = counter.lock();
                        let seen = *guard;
                        spin_loop();
                        *guard = seen + 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(*counter.lock(), THREADS as u64 * ROUNDS);
    }

    /// More contenders than host CPUs, with the holder giving up its host
    /// CPU inside the critical section. Waiters must yield for the holder to
    /// get back on a CPU in bounded time.
    #[test]
    fn oversubscribed_contenders_make_progress() {
        const ROUNDS: u64 = 500;
        let threads = thread::available_parallelism().map_or(1, |n| n.get()) * 4;
        let counter = Arc::new(Spinlock::new("crowded", 0u64));
        let start = Instant::now();

        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let mut guard = counter.lock();
                        thread::yield_now();
                        *guard += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(*counter.lock(), threads as u64 * ROUNDS);
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn lock_disables_interrupts_until_release() {
        enable_interrupts();
        let lock = Spinlock::new("irq", ());
        {
            let _outer = lock.lock();
            assert!(!are_interrupts_enabled());
            assert!(lock.holding());
            assert_eq!(get_percpu_data().noff(), 1);
        }
        assert!(are_interrupts_enabled());
        assert!(!lock.holding());
        assert_eq!(get_percpu_data().noff(), 0);
    }

    #[test]
    fn nested_locks_keep_interrupts_off() {
        enable_interrupts();
        let a = Spinlock::new("a", 1);
        let b = Spinlock::new("b", 2);
        let ga = a.lock();
        let gb = b.lock();
        assert_eq!(*ga + *gb, 3);
        drop(gb);
        assert!(!are_interrupts_enabled());
        drop(ga);
        assert!(are_interrupts_enabled());
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn reacquire_on_same_cpu_panics() {
        let lock = Spinlock::new("twice", 0);
        let _first = lock.lock();
        let _second = lock.lock();
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let lock = Arc::new(Spinlock::new("try", 0));
        let guard = lock.lock();
        let other = Arc::clone(&lock);
        let got = thread::spawn(move || {
            let acquired = other.try_lock().is_some();
            acquired
        })
        .join()
        .unwrap();
        assert!(!got);
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn handoff_then_adopt_keeps_lock_held() {
        let lock = Spinlock::new("baton", 5);
        let guard = lock.lock();
        guard.handoff();
        assert!(lock.holding());
        assert_eq!(get_percpu_data().noff(), 1);
        // SAFETY: the guard above was handed off on this thread.
        let mut adopted = unsafe { lock.adopt() };
        *adopted += 1;
        let lock_ref = adopted.unlock();
        assert!(!lock_ref.is_locked());
        assert_eq!(*lock.lock(), 6);
    }
}
