//! Execution contexts and the cooperative switch between them.
//!
//! Every process runs on its own kernel thread and every hart's scheduler
//! loop runs on the hart's thread. A [`Context`] is the resumption point of
//! one of those threads. `swtch(old, new)` resumes `new` on the calling hart
//! and parks until someone resumes `old`, which is the only point where a
//! thread gives up or regains a hart. The resumed thread takes over the hart
//! identity before running any kernel code.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Thread};

use rivet_lib::percpu::{bind_current_cpu, current_cpu_id, unbind_current_cpu};

use crate::kernel::Kernel;

pub struct Context {
    /// Thread that continues when this context is resumed.
    owner: spin::Mutex<Option<Thread>>,
    resume: AtomicBool,
    /// Hart the context is being resumed on.
    hart: AtomicUsize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            owner: spin::Mutex::new(None),
            resume: AtomicBool::new(false),
            hart: AtomicUsize::new(0),
        }
    }

    /// Attach the thread that will run when this context is resumed.
    pub fn bind(&self, thread: Thread) {
        self.resume.store(false, Ordering::Relaxed);
        *self.owner.lock() = Some(thread);
    }

    pub fn clear(&self) {
        self.resume.store(false, Ordering::Relaxed);
        *self.owner.lock() = None;
    }

    /// Unpark the owner without resuming it; it re-checks and parks again.
    pub(crate) fn kick(&self) {
        if let Some(thread) = self.owner.lock().as_ref() {
            thread.unpark();
        }
    }

    fn resume_on(&self, hart: usize) {
        self.hart.store(hart, Ordering::Relaxed);
        self.resume.store(true, Ordering::Release);
        match self.owner.lock().as_ref() {
            Some(thread) => thread.unpark(),
            None => panic!("swtch: context has no thread"),
        }
    }

    /// Block the calling thread until the context is resumed. Returns the hart
    /// it was resumed on.
    pub(crate) fn park_until_resumed(&self) -> usize {
        while !self.resume.swap(false, Ordering::Acquire) {
            thread::park();
        }
        self.hart.load(Ordering::Relaxed)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Take over hart `hart` of `kernel` on the calling thread.
pub(crate) fn enter_hart(kernel: &'static Kernel, hart: usize) {
    bind_current_cpu(kernel.cpu(hart).percpu());
}

/// Save the caller in `old`, resume `new` on this hart, and return once
/// `old` is resumed (possibly on another hart).
pub(crate) fn swtch(old: &Context, new: &Context) {
    let kernel = Kernel::current();
    let hart = current_cpu_id();
    kernel.cpu(hart).percpu().context_switches.fetch_add(1, Ordering::Relaxed);
    new.resume_on(hart);
    let hart = old.park_until_resumed();
    enter_hart(kernel, hart);
}

/// Resume `new` on this hart and give the hart up for good. The calling
/// thread must not touch kernel state afterwards.
pub(crate) fn swtch_final(new: &Context) {
    let hart = current_cpu_id();
    unbind_current_cpu();
    new.resume_on(hart);
}
