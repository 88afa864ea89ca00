//! Idle wait for a hart with nothing to run.

use std::time::Duration;

/// Spin hints issued before a busy wait starts yielding its host thread.
pub const SPINS_BEFORE_YIELD: u32 = 64;

/// Hosted `wfi`: park the hart's thread until it is unparked or `timeout`
/// elapses. Callers re-check their run condition afterwards, so spurious
/// returns are harmless.
#[inline]
pub fn wait_for_interrupt(timeout: Duration) {
    std::thread::park_timeout(timeout);
}

/// Busy-wait pacing: a short burst of spin hints, then `yield_now` on every
/// step. Harts and processes are host threads, so a waiter that never yields
/// can hold a host CPU the thread it waits on needs.
#[derive(Debug, Default)]
pub struct Backoff {
    spins: u32,
}

impl Backoff {
    #[inline]
    pub const fn new() -> Self {
        Self { spins: 0 }
    }

    #[inline]
    pub fn relax(&mut self) {
        if self.spins < SPINS_BEFORE_YIELD {
            self.spins += 1;
            core::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }

    #[inline]
    pub fn is_yielding(&self) -> bool {
        self.spins >= SPINS_BEFORE_YIELD
    }
}
