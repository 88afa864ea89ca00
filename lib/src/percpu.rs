//! Per-hart data and hart identity.
//!
//! # Architecture
//!
//! Each hart of a booted kernel owns one `PerCpuData`. A host thread becomes
//! "the code running on hart N" by binding that hart's data into a
//! thread-local slot, the hosted stand-in for the `tp` register. The binding
//! moves with the context switch: whichever thread the hart switches into
//! binds the hart before touching any kernel state.
//!
//! Threads that were never bound (test drivers, the boot thread) lazily get a
//! private *detached* record so spinlocks still work there. Detached ids
//! start at [`DETACHED_CPU_BASE`] and never collide with a hart id.
//!
//! # Usage
//!
//! ```ignore
//! let cpu_id = current_cpu_id();
//! let data = get_percpu_data();
//! ```

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

pub use rivet_abi::NCPU as MAX_CPUS;

/// First id handed to a thread that is not bound to any hart.
pub const DETACHED_CPU_BASE: usize = 1 << 16;

static NEXT_DETACHED_ID: AtomicUsize = AtomicUsize::new(DETACHED_CPU_BASE);

/// Per-hart data structure, cache-line aligned so neighbouring harts do not
/// false-share.
#[repr(C, align(64))]
pub struct PerCpuData {
    cpu_id: usize,
    /// Depth of nested `push_off` regions.
    noff: AtomicU32,
    /// Interrupt-enable state captured by the outermost `push_off`.
    intena: AtomicBool,
    /// Emulated interrupt-enable bit.
    irq_enabled: AtomicBool,
    pub online: AtomicBool,
    pub context_switches: AtomicU64,
}

impl PerCpuData {
    pub const fn new(cpu_id: usize) -> Self {
        Self {
            cpu_id,
            noff: AtomicU32::new(0),
            intena: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            online: AtomicBool::new(false),
            context_switches: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    #[inline]
    pub fn is_hart(&self) -> bool {
        self.cpu_id < DETACHED_CPU_BASE
    }

    #[inline]
    pub fn noff(&self) -> u32 {
        self.noff.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_noff(&self, depth: u32) {
        self.noff.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn intena(&self) -> bool {
        self.intena.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_intena(&self, enabled: bool) {
        self.intena.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_irq_enabled(&self, enabled: bool) {
        self.irq_enabled.store(enabled, Ordering::Relaxed);
    }
}

thread_local! {
    static CURRENT_CPU: Cell<Option<&'static PerCpuData>> = const { Cell::new(None) };
}

/// Make the calling thread execute as the hart owning `data`.
#[inline]
pub fn bind_current_cpu(data: &'static PerCpuData) {
    CURRENT_CPU.with(|slot| slot.set(Some(data)));
}

/// Drop the calling thread's hart binding. Used right before a thread hands
/// its hart to another thread for the last time.
#[inline]
pub fn unbind_current_cpu() {
    CURRENT_CPU.with(|slot| slot.set(None));
}

/// Per-hart data of the calling thread, creating a detached record for
/// threads that have never been bound.
pub fn get_percpu_data() -> &'static PerCpuData {
    CURRENT_CPU.with(|slot| match slot.get() {
        Some(data) => data,
        None => {
            let id = NEXT_DETACHED_ID.fetch_add(1, Ordering::Relaxed);
            let data: &'static PerCpuData = Box::leak(Box::new(PerCpuData::new(id)));
            data.set_irq_enabled(true);
            slot.set(Some(data));
            data
        }
    })
}

#[inline]
pub fn current_cpu_id() -> usize {
    get_percpu_data().cpu_id()
}

/// Hart id of the calling thread, or `None` when it is not running as a hart.
#[inline]
pub fn current_hart() -> Option<usize> {
    CURRENT_CPU.with(|slot| slot.get().filter(|data| data.is_hart()).map(|data| data.cpu_id()))
}
