//! Per-hart scheduler state.
//!
//! Each hart owns one `Cpu`: the interrupt/nesting record every spinlock
//! uses, the context its scheduler loop parks in while a process runs, and
//! the slot of that process. Only the thread currently running as the hart
//! writes `proc`; the atomics exist so other harts can read it for
//! diagnostics.

use core::sync::atomic::{AtomicUsize, Ordering};

use rivet_lib::PerCpuData;

use super::switch_context::Context;

const NO_PROC: usize = usize::MAX;

pub struct Cpu {
    percpu: PerCpuData,
    /// `swtch` here to enter this hart's scheduler loop.
    pub(crate) context: Context,
    proc: AtomicUsize,
    /// Slot the round-robin scan resumes after.
    last_slot: AtomicUsize,
}

impl Cpu {
    pub fn new(id: usize) -> Self {
        Self {
            percpu: PerCpuData::new(id),
            context: Context::new(),
            proc: AtomicUsize::new(NO_PROC),
            last_slot: AtomicUsize::new(NO_PROC),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.percpu.cpu_id()
    }

    #[inline]
    pub fn percpu(&self) -> &PerCpuData {
        &self.percpu
    }

    /// Slot of the process running on this hart.
    #[inline]
    pub fn proc_slot(&self) -> Option<usize> {
        match self.proc.load(Ordering::Relaxed) {
            NO_PROC => None,
            slot => Some(slot),
        }
    }

    #[inline]
    pub(crate) fn set_proc(&self, slot: Option<usize>) {
        self.proc.store(slot.unwrap_or(NO_PROC), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_slot(&self) -> usize {
        self.last_slot.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_last_slot(&self, slot: usize) {
        self.last_slot.store(slot, Ordering::Relaxed);
    }

    pub fn context_switches(&self) -> u64 {
        self.percpu.context_switches.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.percpu.online.load(Ordering::Relaxed)
    }
}
