//! Fixtures for scenario tests that boot a whole kernel.

use core::ops::Deref;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rivet_abi::{Pid, ProcState};
use rivet_lib::{Spinlock, config_from_cmdline};

use crate::kernel::Kernel;
use crate::scheduler::{Channel, killed, myproc, sleep};

/// Upper bound for any single wait in a scenario test. Generous, so only a
/// lost wakeup or a deadlock hits it.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

/// A booted kernel that halts when the test is done with it.
pub(crate) struct TestKernel {
    kernel: &'static Kernel,
}

impl Deref for TestKernel {
    type Target = Kernel;

    fn deref(&self) -> &Kernel {
        self.kernel
    }
}

impl TestKernel {
    #[allow(dead_code)]
    pub(crate) fn kernel(&self) -> &'static Kernel {
        self.kernel
    }

    /// State of the live process `pid`, or `None` once it has been reaped.
    pub(crate) fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.kernel
            .procs_snapshot()
            .into_iter()
            .find(|row| row.pid == pid)
            .map(|row| row.state)
    }
}

impl Drop for TestKernel {
    fn drop(&mut self) {
        self.kernel.halt();
        self.kernel.wait_halted(Duration::from_secs(2));
    }
}

/// Boot a quiet kernel configured by `cmdline` with `init` as its first
/// program.
pub(crate) fn boot_with<F>(cmdline: &str, init: F) -> TestKernel
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let cmdline = format!("quiet idle.us=100 {}", cmdline);
    let config = config_from_cmdline(Some(cmdline.as_str()));
    match Kernel::boot(config, init) {
        Ok(kernel) => TestKernel { kernel },
        Err(err) => panic!("boot failed: {}", err),
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

/// A one-shot condition processes can block on: a flag under a spinlock
/// plus the channel its waiters sleep on.
#[derive(Clone)]
pub(crate) struct Gate {
    open: Arc<Spinlock<bool>>,
    chan: Channel,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            open: Arc::new(Spinlock::new("gate", false)),
            chan: Channel::unique(),
        }
    }

    pub(crate) fn chan(&self) -> Channel {
        self.chan
    }

    /// Block the calling process until the gate opens.
    pub(crate) fn pass(&self) {
        let mut open = self.open.lock();
        while !*open {
            open = sleep(self.chan, open);
        }
    }

    /// Like `pass`, but give up when the caller is killed. Returns whether
    /// the gate was passed.
    pub(crate) fn pass_unless_killed(&self) -> bool {
        let p = myproc();
        let mut open = self.open.lock();
        while !*open {
            if killed(p) {
                return false;
            }
            open = sleep(self.chan, open);
        }
        true
    }

    /// Open the gate from any thread of `kernel`'s host process.
    pub(crate) fn open(&self, kernel: &Kernel) {
        let mut open = self.open.lock();
        *open = true;
        kernel.wakeup(self.chan);
    }
}
