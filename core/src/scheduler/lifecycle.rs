//! Process creation, exit and reaping.
//!
//! Every process body is a Rust closure running on the process's own kernel
//! thread. The thread parks until a hart first switches into it, finishes
//! the switch the scheduler started (`forkret`), runs the body, and exits
//! with the value the body returns or the status passed to [`exit`].
//!
//! Parent links and the `Zombie` hand-off are guarded by the kernel's
//! `wait_lock`; a parent sleeps on [`Channel::child_exit`] of its own pid.

use core::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Thread};

use rivet_abi::{NOFILE, PGSIZE, Pid, ProcState};
use rivet_lib::{klog_debug, klog_error, klog_info, klog_warn};

use super::proc::{ParentTable, Proc, killed, myproc};
use super::scheduler::sched_exit;
use super::sleep::{Channel, sleep};
use super::switch_context::enter_hart;
use crate::error::{KernelError, KernelResult};
use crate::file::{File, InodeRef};
use crate::kernel::Kernel;
use crate::vm::AddressSpace;

/// Body of a process. Its return value is the exit status.
pub type ProcEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Unwind payload carrying an `exit` status to the bottom of the process
/// thread.
struct ExitRequest(i32);

/// Terminate the calling process with `status`. Does not return.
///
/// The process thread unwinds to its entry frame, dropping everything the
/// body owned, and the exit bookkeeping runs there. Must not be called with
/// a spinlock held.
pub fn exit(status: i32) -> ! {
    panic::resume_unwind(Box::new(ExitRequest(status)))
}

pub(crate) fn kernel_panic(what: &str, payload: Box<dyn Any + Send>) -> ! {
    let msg: &str = if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string payload>"
    };
    klog_error!("kernel panic in {}: {}", what, msg);
    std::process::abort()
}

/// Run a process body, turning an `exit` unwind back into a status.
fn run_entry(name: &str, entry: ProcEntry) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(status) => status,
        Err(payload) => match payload.downcast::<ExitRequest>() {
            Ok(request) => request.0,
            Err(payload) => kernel_panic(name, payload),
        },
    }
}

/// Bottom frame of every process thread.
fn process_main(kernel: &'static Kernel, p: &'static Proc, entry: ProcEntry) {
    kernel.enter();
    let hart = p.context.park_until_resumed();
    enter_hart(kernel, hart);

    // forkret: the scheduler switched in holding our lock.
    let name = {
        // SAFETY: handed off by `scheduler` on this hart just before the switch.
        let inner = unsafe { p.spinlock().adopt() };
        inner.name.clone()
    };

    let status = run_entry(&name, entry);
    exit_current(kernel, p, status);
}

fn exit_current(kernel: &'static Kernel, p: &'static Proc, status: i32) {
    let pid = p.pid();
    if kernel.initproc() == Some(pid) {
        kernel_panic("init", Box::new("init exiting"));
    }

    // Close files with no lock held; a closing pipe end wakes its peer.
    let (files, cwd) = {
        let mut inner = p.lock();
        let files = core::mem::replace(&mut inner.ofile, [const { None }; NOFILE]);
        (files, inner.cwd.take())
    };
    drop(files);
    if let Some(cwd) = cwd {
        klog_debug!("exit: pid {} releases cwd inode {}", pid, cwd.inum());
    }

    let mut links = kernel.wait_lock().lock();

    // Give any children to init.
    if let Some(init) = kernel.initproc() {
        if links.reparent(pid, init) {
            kernel.wakeup(Channel::child_exit(init));
        }
    }

    // Parent might be sleeping in wait().
    if let Some(parent) = links.parent_of(p.slot()) {
        kernel.wakeup(Channel::child_exit(parent));
    }

    let mut inner = p.lock();
    inner.xstate = status;
    inner.set_state(ProcState::Zombie);
    klog_debug!("proc {} ({}): exit {}", pid, inner.name, status);

    drop(links);

    sched_exit(inner);
}

/// Collect one `Zombie` child of `me`, if there is one. The first field
/// reports whether `me` has any children at all.
fn reap_one(kernel: &Kernel, links: &mut ParentTable, me: Pid) -> (bool, Option<(Pid, i32)>) {
    let mut havekids = false;
    for child in kernel.procs() {
        if links.parent_of(child.slot()) != Some(me) {
            continue;
        }
        havekids = true;

        let mut inner = child.lock();
        if inner.state == ProcState::Zombie {
            let found = (inner.pid, inner.xstate);
            kernel.freeproc(child, &mut inner);
            drop(inner);
            links.set_parent(child.slot(), None);
            return (true, Some(found));
        }
    }
    (havekids, None)
}

/// Wait for a child to exit and return its pid and exit status.
///
/// Fails with `NoChild` when the caller has no children and with
/// `Interrupted` when the caller has been killed.
pub fn wait() -> KernelResult<(Pid, i32)> {
    let kernel = Kernel::current();
    let p = myproc();
    let me = p.pid();

    let mut links = kernel.wait_lock().lock();
    loop {
        let (havekids, reaped) = reap_one(kernel, &mut links, me);
        if let Some(found) = reaped {
            return Ok(found);
        }
        if !havekids {
            return Err(KernelError::NoChild);
        }
        if killed(p) {
            return Err(KernelError::Interrupted);
        }

        links = sleep(Channel::child_exit(me), links);
    }
}

/// Init's tail: collect orphans forever. Sleeps while there are none.
fn reap_forever() -> ! {
    let kernel = Kernel::current();
    let me = myproc().pid();

    let mut links = kernel.wait_lock().lock();
    loop {
        while let (_, Some((pid, status))) = reap_one(kernel, &mut links, me) {
            klog_debug!("init: reaped {} status {}", pid, status);
        }
        links = sleep(Channel::child_exit(me), links);
    }
}

/// Create a child of the calling process running `entry`.
///
/// The child gets a copy of the caller's memory and shares its open files
/// and working directory. Returns the child's pid.
pub fn spawn<F>(name: &str, entry: F) -> KernelResult<Pid>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    Kernel::current().spawn_from(myproc(), name, Box::new(entry))
}

/// What a child takes from its parent.
struct Inherited {
    memory: AddressSpace,
    ofile: [Option<Arc<File>>; NOFILE],
    cwd: Option<InodeRef>,
}

impl Kernel {
    fn start_kernel_thread(&'static self, p: &'static Proc, entry: ProcEntry) -> KernelResult<Thread> {
        let kernel = self;
        let spawned = thread::Builder::new()
            .name(format!("proc{}", p.slot()))
            .stack_size(self.config().kstack_bytes())
            .spawn(move || process_main(kernel, p, entry));
        match spawned {
            Ok(handle) => Ok(handle.thread().clone()),
            Err(err) => {
                klog_warn!("proc: cannot start kernel thread: {}", err);
                Err(KernelError::OutOfMemory)
            }
        }
    }

    fn inherit(&'static self, parent: &Proc) -> KernelResult<Inherited> {
        let inner = parent.lock();
        let memory = match inner.memory.as_ref() {
            Some(memory) => memory.try_clone(self.kmem()),
            None => AddressSpace::new(self.kmem()),
        };
        let Some(memory) = memory else {
            return Err(KernelError::OutOfMemory);
        };
        Ok(Inherited {
            memory,
            ofile: inner.ofile.clone(),
            cwd: inner.cwd,
        })
    }

    /// Return a half-built slot to the free pool.
    fn abandon(&self, p: &Proc) {
        let mut inner = p.lock();
        self.freeproc(p, &mut inner);
    }

    pub(crate) fn spawn_from(&'static self, parent: &'static Proc, name: &str, entry: ProcEntry) -> KernelResult<Pid> {
        let (np, inner) = self.allocproc()?;
        let pid = inner.pid;
        drop(inner);

        let inherited = match self.inherit(parent) {
            Ok(inherited) => inherited,
            Err(err) => {
                self.abandon(np);
                return Err(err);
            }
        };

        let thread = match self.start_kernel_thread(np, entry) {
            Ok(thread) => thread,
            Err(err) => {
                self.abandon(np);
                drop(inherited);
                return Err(err);
            }
        };

        {
            let mut inner = np.lock();
            inner.memory = Some(inherited.memory);
            inner.ofile = inherited.ofile;
            inner.cwd = inherited.cwd;
            inner.set_name(name);
        }
        np.context.bind(thread);

        let parent_pid = parent.pid();
        self.wait_lock().lock().set_parent(np.slot(), Some(parent_pid));

        np.lock().set_state(ProcState::Runnable);
        self.kick_idle_harts();

        klog_debug!("proc {}: spawned {} from {}", pid, name, parent_pid);
        Ok(pid)
    }

    /// Set up the first process. It runs `init`, then reaps orphans for the
    /// life of the kernel.
    pub(crate) fn userinit(&'static self, init: ProcEntry) -> KernelResult<Pid> {
        let console = File::console(self)?;

        let (p, mut inner) = self.allocproc()?;
        let memory = AddressSpace::new(self.kmem()).and_then(|mut memory| {
            memory.grow(self.kmem(), PGSIZE).ok()?;
            Some(memory)
        });
        let Some(memory) = memory else {
            self.freeproc(p, &mut inner);
            drop(inner);
            klog_error!("userinit: out of memory");
            return Err(KernelError::OutOfMemory);
        };

        inner.memory = Some(memory);
        inner.cwd = Some(InodeRef::ROOT);
        inner.set_name("init");
        let pid = inner.pid;
        drop(inner);

        self.initproc.call_once(|| pid);

        let body: ProcEntry = Box::new(move || {
            let status = run_entry("init", init);
            klog_info!("init: program finished with status {}", status);
            reap_forever()
        });
        let thread = match self.start_kernel_thread(p, body) {
            Ok(thread) => thread,
            Err(err) => {
                self.abandon(p);
                return Err(err);
            }
        };
        p.context.bind(thread);

        // stdin, stdout, stderr
        {
            let mut inner = p.lock();
            for fd in 0..3 {
                inner.ofile[fd] = Some(Arc::clone(&console));
            }
            inner.set_state(ProcState::Runnable);
        }
        drop(console);

        klog_info!("userinit: init is {}", pid);
        Ok(pid)
    }

    /// Request that `pid` terminate. Only sets the flag: a sleeping target
    /// notices the next time it is woken, and the syscall layer exits a
    /// killed process on its way back to user code.
    pub fn kill(&self, pid: Pid) -> KernelResult<()> {
        let p = self.procs().get(pid.slot()).ok_or(KernelError::NoProcess)?;
        let mut inner = p.lock();
        if inner.pid != pid || inner.state == ProcState::Unused {
            return Err(KernelError::NoProcess);
        }
        inner.killed = true;
        klog_debug!("proc {}: kill requested", pid);
        Ok(())
    }

    pub fn initproc(&self) -> Option<Pid> {
        self.initproc.get().copied()
    }
}

/// Grow or shrink the calling process's memory by `n` bytes. Returns the
/// previous size.
pub fn grow_memory(n: isize) -> KernelResult<usize> {
    let kernel = Kernel::current();
    let p = myproc();
    let mut inner = p.lock();
    let Some(memory) = inner.memory.as_mut() else {
        return Err(KernelError::BadAddress);
    };

    let old = memory.size();
    if n >= 0 {
        let new = old.checked_add(n.unsigned_abs()).ok_or(KernelError::OutOfMemory)?;
        memory.grow(kernel.kmem(), new)?;
    } else {
        let new = old.checked_sub(n.unsigned_abs()).ok_or(KernelError::InvalidArg)?;
        memory.shrink(new);
    }
    Ok(old)
}
