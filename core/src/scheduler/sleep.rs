//! Wait channels: `sleep` and `wakeup`.
//!
//! A sleeper checks its condition under some lock `lk`, then calls
//! `sleep(chan, lk)`. Anyone making the condition true must hold the same
//! `lk` while doing so and call `wakeup(chan)` afterwards. `sleep` takes the
//! process lock before it lets go of `lk`, and `wakeup` needs that process
//! lock to flip the sleeper back to `Runnable`, so a wakeup cannot land in
//! the gap between the check and the suspension.
//!
//! Wakeup is a broadcast to every process sleeping on the channel. Sleepers
//! re-check their condition in a loop.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use rivet_abi::{Pid, ProcState};
use rivet_lib::{SpinlockGuard, current_hart};

use super::proc::myproc;
use super::scheduler::sched;
use crate::kernel::Kernel;

const CHILD_EXIT_TAG: u64 = 1 << 63;

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Identity of one blocking condition. Compared for equality only.
///
/// Two kinds exist:
/// - [`Channel::unique`]: a fresh token for a condition owned by some
///   object (a pipe's "not empty" and "not full"). Never reused.
/// - [`Channel::child_exit`]: "a child of `parent` changed state", paired
///   with the kernel's `wait_lock`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(u64);

impl Channel {
    pub fn unique() -> Self {
        Channel(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn child_exit(parent: Pid) -> Self {
        Channel(CHILD_EXIT_TAG | parent.as_raw() as u64)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 & CHILD_EXIT_TAG != 0 {
            write!(f, "Channel(child-exit {})", self.0 & !CHILD_EXIT_TAG)
        } else {
            write!(f, "Channel({})", self.0)
        }
    }
}

/// Atomically release `lk` and block on `chan`; re-acquire `lk` once woken.
pub fn sleep<'a, T>(chan: Channel, lk: SpinlockGuard<'a, T>) -> SpinlockGuard<'a, T> {
    let p = myproc();

    let mut inner = p.lock();
    let lk = lk.unlock();

    inner.chan = Some(chan);
    inner.set_state(ProcState::Sleeping);

    let mut inner = sched(p, inner);

    // Tidy up.
    inner.chan = None;
    drop(inner);

    lk.lock()
}

/// Wake every process sleeping on `chan` in the current kernel.
pub fn wakeup(chan: Channel) {
    Kernel::current().wakeup(chan);
}

impl Kernel {
    /// Wake every process sleeping on `chan`. Callers hold the lock paired
    /// with the channel; must not be called with a process lock held.
    pub fn wakeup(&self, chan: Channel) {
        let me = self.current_slot();
        let mut woke = false;
        for p in self.procs() {
            if Some(p.slot()) == me {
                continue;
            }
            let mut inner = p.lock();
            if inner.state == ProcState::Sleeping && inner.chan == Some(chan) {
                inner.chan = None;
                inner.set_state(ProcState::Runnable);
                woke = true;
            }
        }
        if woke {
            self.kick_idle_harts();
        }
    }

    /// Slot of the process on the calling hart, if this thread is one of
    /// this kernel's harts.
    pub(crate) fn current_slot(&self) -> Option<usize> {
        let hart = current_hart()?;
        self.cpus().get(hart)?.proc_slot()
    }
}
