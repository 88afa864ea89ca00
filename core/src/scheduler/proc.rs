//! Process table.
//!
//! A fixed arena of [`Proc`] slots sized at boot. Each slot has its own
//! spinlock; there is no whole-table lock, so harts scan concurrently.
//! Parent links live apart from the slots in [`ParentTable`], guarded by
//! the kernel's `wait_lock`, because reparenting touches other processes'
//! links atomically with respect to every `exit` and `wait`.
//!
//! Lock order: `wait_lock` before any `Proc` lock; a pipe lock before any
//! `Proc` lock. At most one `Proc` lock is held at a time.

use std::sync::Arc;

use rivet_abi::{NOFILE, PROC_NAME_MAX, Pid, ProcState};
use rivet_lib::{IrqOffGuard, Spinlock, SpinlockGuard, current_hart, klog_info, klog_trace};

use super::per_cpu::Cpu;
use super::sleep::Channel;
use super::switch_context::Context;
use crate::error::{KernelError, KernelResult};
use crate::file::{File, InodeRef};
use crate::kalloc::Page;
use crate::kernel::Kernel;
use crate::vm::AddressSpace;

/// Fields behind a process's own lock.
///
/// `state`, `chan`, `killed`, `xstate` and `pid` are shared with other
/// harts. The rest is private to the running process but lives under the
/// same lock so every access is checked.
pub struct ProcInner {
    pub(crate) state: ProcState,
    /// Set only while `Sleeping`.
    pub(crate) chan: Option<Channel>,
    pub(crate) killed: bool,
    pub(crate) xstate: i32,
    pub(crate) pid: Pid,
    generation: u32,

    pub(crate) name: String,
    pub(crate) kstack: Option<Page>,
    pub(crate) memory: Option<AddressSpace>,
    pub(crate) ofile: [Option<Arc<File>>; NOFILE],
    pub(crate) cwd: Option<InodeRef>,
}

impl ProcInner {
    fn new() -> Self {
        Self {
            state: ProcState::Unused,
            chan: None,
            killed: false,
            xstate: 0,
            pid: Pid::INVALID,
            generation: 0,
            name: String::new(),
            kstack: None,
            memory: None,
            ofile: [const { None }; NOFILE],
            cwd: None,
        }
    }

    #[inline]
    pub fn state(&self) -> ProcState {
        self.state
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn killed(&self) -> bool {
        self.killed
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move along one lifecycle edge. Any other move is a kernel bug.
    pub(crate) fn set_state(&mut self, next: ProcState) {
        if !self.state.can_transition_to(next) {
            panic!(
                "proc {} ({}): invalid transition {} -> {}",
                self.pid, self.name, self.state, next
            );
        }
        klog_trace!("proc {}: {} -> {}", self.pid, self.state, next);
        self.state = next;
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(PROC_NAME_MAX - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name.clear();
        self.name.push_str(&name[..end]);
    }

    /// Install a reference to `file` in the lowest free descriptor. The
    /// caller keeps its own reference, so a failure never closes the file
    /// under this lock.
    pub(crate) fn fdalloc(&mut self, file: &Arc<File>) -> KernelResult<usize> {
        match self.ofile.iter().position(Option::is_none) {
            Some(fd) => {
                self.ofile[fd] = Some(Arc::clone(file));
                Ok(fd)
            }
            None => Err(KernelError::OutOfHandles),
        }
    }

    pub(crate) fn file(&self, fd: usize) -> KernelResult<Arc<File>> {
        self.ofile
            .get(fd)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(KernelError::BadHandle)
    }
}

pub struct Proc {
    slot: usize,
    inner: Spinlock<ProcInner>,
    pub(crate) context: Context,
}

impl Proc {
    pub(crate) fn new(slot: usize) -> Self {
        Self {
            slot,
            inner: Spinlock::new("proc", ProcInner::new()),
            context: Context::new(),
        }
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, ProcInner> {
        self.inner.lock()
    }

    #[inline]
    pub(crate) fn spinlock(&self) -> &Spinlock<ProcInner> {
        &self.inner
    }

    pub fn pid(&self) -> Pid {
        self.lock().pid
    }

    pub fn state(&self) -> ProcState {
        self.lock().state
    }
}

// ---------------------------------------------------------------------------
// Parent links
// ---------------------------------------------------------------------------

/// Parent of each slot, by pid. Guarded by the kernel's `wait_lock`.
pub(crate) struct ParentTable {
    parent: Box<[Option<Pid>]>,
}

impl ParentTable {
    pub(crate) fn new(nproc: usize) -> Self {
        Self {
            parent: vec![None; nproc].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn parent_of(&self, slot: usize) -> Option<Pid> {
        self.parent[slot]
    }

    #[inline]
    pub(crate) fn set_parent(&mut self, slot: usize, parent: Option<Pid>) {
        self.parent[slot] = parent;
    }

    /// Hand every child of `from` to `to`. Returns whether any moved.
    pub(crate) fn reparent(&mut self, from: Pid, to: Pid) -> bool {
        let mut moved = false;
        for link in self.parent.iter_mut().filter(|link| **link == Some(from)) {
            *link = Some(to);
            moved = true;
        }
        moved
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn has_children(&self, pid: Pid) -> bool {
        self.parent.iter().any(|link| *link == Some(pid))
    }
}

// ---------------------------------------------------------------------------
// Current hart / process
// ---------------------------------------------------------------------------

/// The hart the calling thread is running as.
pub fn mycpu() -> &'static Cpu {
    let kernel = Kernel::current();
    match current_hart() {
        Some(hart) => kernel.cpu(hart),
        None => panic!("mycpu: thread is not running as a hart"),
    }
}

/// The process running on the calling hart, if any.
pub fn try_myproc() -> Option<&'static Proc> {
    let kernel = Kernel::try_current()?;
    let _irq = IrqOffGuard::new();
    kernel.current_slot().map(|slot| kernel.proc(slot))
}

pub fn myproc() -> &'static Proc {
    match try_myproc() {
        Some(p) => p,
        None => panic!("myproc: no process on this hart"),
    }
}

pub fn killed(p: &Proc) -> bool {
    p.lock().killed
}

pub fn set_killed(p: &Proc) {
    p.lock().killed = true;
}

pub fn getpid() -> Pid {
    myproc().pid()
}

// ---------------------------------------------------------------------------
// Slot allocation
// ---------------------------------------------------------------------------

/// One row of a process listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub state: ProcState,
    pub name: String,
    pub killed: bool,
    pub chan: Option<Channel>,
    pub parent: Option<Pid>,
}

impl Kernel {
    /// Claim an `Unused` slot: fresh pid, kernel stack page, clean context.
    /// The slot comes back `Used` and locked.
    pub(crate) fn allocproc(&'static self) -> KernelResult<(&'static Proc, SpinlockGuard<'static, ProcInner>)> {
        for p in self.procs() {
            let mut inner = p.lock();
            if inner.state != ProcState::Unused {
                continue;
            }

            inner.generation = Pid::next_generation(inner.generation);
            inner.pid = Pid::new(p.slot, inner.generation);
            inner.set_state(ProcState::Used);
            p.context.clear();

            match self.kmem().kalloc() {
                Some(kstack) => inner.kstack = Some(kstack),
                None => {
                    self.freeproc(p, &mut inner);
                    return Err(KernelError::OutOfMemory);
                }
            }
            return Ok((p, inner));
        }
        Err(KernelError::TableFull)
    }

    /// Release everything a slot owns and return it to `Unused`. The caller
    /// holds the slot's lock and clears its parent link.
    pub(crate) fn freeproc(&self, p: &Proc, inner: &mut ProcInner) {
        // Files close in exit; dropping one here could wake under our lock.
        debug_assert!(inner.ofile.iter().all(Option::is_none), "freeproc: open files");
        inner.kstack = None;
        inner.memory = None;
        inner.cwd = None;
        inner.name.clear();
        inner.pid = Pid::INVALID;
        inner.chan = None;
        inner.killed = false;
        inner.xstate = 0;
        inner.set_state(ProcState::Unused);
        p.context.clear();
    }

    /// Snapshot of every slot that is not `Unused`.
    pub fn procs_snapshot(&self) -> Vec<ProcInfo> {
        let links = self.wait_lock().lock();
        let mut rows = Vec::new();
        for p in self.procs() {
            let inner = p.lock();
            if inner.state == ProcState::Unused {
                continue;
            }
            rows.push(ProcInfo {
                pid: inner.pid,
                state: inner.state,
                name: inner.name.clone(),
                killed: inner.killed,
                chan: inner.chan,
                parent: links.parent_of(p.slot),
            });
        }
        rows
    }

    /// Log the process table and return it.
    pub fn procdump(&self) -> Vec<ProcInfo> {
        let rows = self.procs_snapshot();
        klog_info!("procdump: {} live processes", rows.len());
        for row in &rows {
            klog_info!(
                "{:>6} {:<7} {:<16}{}",
                row.pid.as_raw(),
                row.state.as_str(),
                row.name,
                if row.killed { " killed" } else { "" }
            );
        }
        rows
    }

    /// Look up the live process with this pid.
    pub fn find(&self, pid: Pid) -> Option<&Proc> {
        let p = self.procs().get(pid.slot())?;
        let inner = p.lock();
        (inner.pid == pid && inner.state != ProcState::Unused).then_some(p)
    }
}
