//! Per-hart scheduler loop and the switch back into it.
//!
//! A process gives up its hart only through [`sched`] (or [`sched_exit`]
//! on the way out), always holding its own lock and nothing else. The
//! scheduler took that lock before switching in, so the lock is held across
//! the transfer in both directions and no other hart can pick the process
//! while its context is in flight.

use core::sync::atomic::Ordering;

use rivet_abi::ProcState;
use rivet_lib::cpu::{are_interrupts_enabled, enable_interrupts, wait_for_interrupt};
use rivet_lib::{SpinlockGuard, klog_debug};

use super::per_cpu::Cpu;
use super::proc::{Proc, ProcInner, mycpu, myproc};
use super::switch_context::{swtch, swtch_final};
use crate::kernel::Kernel;

/// Run processes on the calling hart until the kernel halts.
///
/// Each pass scans the table round-robin starting after the slot this hart
/// ran last. Picking a process: take its lock, mark it `Running`, switch to
/// it. The process switches back holding the same lock, with its state
/// already changed.
pub fn scheduler(kernel: &'static Kernel) {
    let c = mycpu();
    c.set_proc(None);
    let nproc = kernel.procs().len();

    loop {
        // Devices must be able to interrupt an idle scan.
        enable_interrupts();
        if kernel.is_halted() {
            break;
        }

        let mut found = false;
        let start = c.last_slot().wrapping_add(1);
        for n in 0..nproc {
            let slot = (start + n) % nproc;
            let p = kernel.proc(slot);
            let mut inner = p.lock();
            if inner.state != ProcState::Runnable {
                continue;
            }

            inner.set_state(ProcState::Running);
            debug_assert!(
                kernel.cpus().iter().all(|other| other.proc_slot() != Some(slot)),
                "proc {} already running on another hart",
                inner.pid
            );
            c.set_proc(Some(slot));
            c.set_last_slot(slot);
            inner.handoff();

            swtch(&c.context, &p.context);

            // Back from the process; it left `Running` before switching.
            c.set_proc(None);
            // SAFETY: the process handed its lock back to this hart in `sched`.
            drop(unsafe { p.spinlock().adopt() });
            found = true;

            if kernel.is_halted() {
                break;
            }
        }

        if !found {
            wait_for_interrupt(kernel.config().idle_timeout());
        }
    }

    klog_debug!("hart {}: scheduler stopped", c.id());
}

fn check_sched(c: &Cpu, inner: &SpinlockGuard<'_, ProcInner>) {
    if !inner.spinlock().holding() {
        panic!("sched p->lock");
    }
    if c.percpu().noff() != 1 {
        panic!("sched locks");
    }
    if inner.state == ProcState::Running {
        panic!("sched running");
    }
    if are_interrupts_enabled() {
        panic!("sched interruptible");
    }
}

/// Switch from process `p` to this hart's scheduler. The caller holds only
/// `p`'s lock and has already moved `p` out of `Running`. Returns with the
/// lock held again once `p` is next scheduled, possibly on another hart.
pub(crate) fn sched<'a>(p: &'a Proc, inner: SpinlockGuard<'a, ProcInner>) -> SpinlockGuard<'a, ProcInner> {
    let c = mycpu();
    check_sched(c, &inner);

    // `intena` belongs to this kernel thread, not to the hart.
    let intena = c.percpu().intena();
    inner.handoff();
    swtch(&p.context, &c.context);
    mycpu().percpu().set_intena(intena);

    // SAFETY: the scheduler that resumed us took `p`'s lock on this hart and
    // handed it off before switching.
    unsafe { p.spinlock().adopt() }
}

/// Final switch out of an exiting process. Does not come back; the caller's
/// thread must return without touching kernel state.
pub(crate) fn sched_exit(inner: SpinlockGuard<'_, ProcInner>) {
    let c = mycpu();
    check_sched(c, &inner);
    klog_debug!("proc {}: leaving hart {} for good", inner.pid, c.id());
    inner.handoff();
    swtch_final(&c.context);
}

/// Give up the hart for one scheduling round.
pub fn yield_now() {
    let p = myproc();
    let mut inner = p.lock();
    inner.set_state(ProcState::Runnable);
    drop(sched(p, inner));
}

impl Kernel {
    /// Unpark harts that may be idle-waiting so they rescan promptly.
    pub(crate) fn kick_idle_harts(&self) {
        for cpu in self.cpus() {
            if cpu.proc_slot().is_none() && cpu.is_online() {
                cpu.context.kick();
            }
        }
    }

    /// Total context switches performed by all harts.
    pub fn context_switches(&self) -> u64 {
        self.cpus()
            .iter()
            .map(|cpu| cpu.percpu().context_switches.load(Ordering::Relaxed))
            .sum()
    }
}
