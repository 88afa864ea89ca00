//! The kernel instance and its boot sequence.
//!
//! All kernel state hangs off one [`Kernel`], leaked at boot so every hart
//! and process thread can hold `&'static` references into it. Several
//! kernels may run side by side in one host process; each thread knows
//! which one it belongs to through a thread-local set when the thread
//! starts.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use rivet_abi::Pid;
use rivet_lib::cpu::Backoff;
use rivet_lib::klog::{klog_init, klog_register_backend};
use rivet_lib::{BootConfig, Spinlock, klog_debug, klog_info, klog_warn};

use crate::error::{KernelError, KernelResult};
use crate::file::FileTable;
use crate::kalloc::Kmem;
use crate::platform::{console_klog_backend, disk_init, ensure_platform_services};
use crate::scheduler::lifecycle::{ProcEntry, kernel_panic};
use crate::scheduler::per_cpu::Cpu;
use crate::scheduler::proc::{ParentTable, Proc};
use crate::scheduler::scheduler;
use crate::scheduler::switch_context::enter_hart;

thread_local! {
    static CURRENT: Cell<Option<&'static Kernel>> = const { Cell::new(None) };
}

pub struct Kernel {
    config: BootConfig,
    cpus: Box<[Cpu]>,
    procs: Box<[Proc]>,
    /// Parent links; also the lock `wait` sleeps under.
    wait_lock: Spinlock<ParentTable>,
    kmem: Kmem,
    ftable: FileTable,
    pub(crate) initproc: spin::Once<Pid>,
    /// Set by hart 0 once the one-time init is done.
    started: AtomicBool,
    halted: AtomicBool,
}

impl Kernel {
    fn new(config: BootConfig) -> Self {
        Self {
            config,
            cpus: (0..config.cpus).map(Cpu::new).collect(),
            procs: (0..config.nproc).map(Proc::new).collect(),
            wait_lock: Spinlock::new("wait_lock", ParentTable::new(config.nproc)),
            kmem: Kmem::new(config.mem_pages),
            ftable: FileTable::new(rivet_abi::NFILE),
            initproc: spin::Once::new(),
            started: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    /// Bring up a kernel with `config.cpus` harts and `init` as the first
    /// process. Returns once the first process is runnable.
    pub fn boot<F>(config: BootConfig, init: F) -> KernelResult<&'static Kernel>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        klog_init(config.klog_level);
        ensure_platform_services();
        klog_register_backend(console_klog_backend);

        klog_info!(
            "rivet: booting {} harts, {} proc slots, {} pages",
            config.cpus,
            config.nproc,
            config.mem_pages
        );

        let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(config)));

        let (done_tx, done_rx) = mpsc::channel();
        let mut init = Some((Box::new(init) as ProcEntry, done_tx));
        for hart in 0..config.cpus {
            let boot_work = if hart == 0 { init.take() } else { None };
            let spawned = thread::Builder::new()
                .name(format!("hart{}", hart))
                .spawn(move || hart_main(kernel, hart, boot_work));
            if let Err(err) = spawned {
                klog_warn!("boot: cannot start hart {}: {}", hart, err);
                kernel.halt();
                return Err(KernelError::OutOfMemory);
            }
        }

        match done_rx.recv() {
            Ok(Ok(pid)) => {
                klog_debug!("boot: init is {}", pid);
                Ok(kernel)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                kernel.halt();
                Err(KernelError::OutOfMemory)
            }
        }
    }

    /// One-time init on hart 0. On failure the kernel halts before any
    /// other hart enters its scheduler.
    fn main_init(&'static self, init: ProcEntry) -> KernelResult<Pid> {
        boot_step("disk", || {
            disk_init();
            Ok(())
        })?;
        boot_step("userinit", || self.userinit(init))
    }

    // -- Accessors ------------------------------------------------------------

    /// The kernel the calling thread belongs to.
    pub fn current() -> &'static Kernel {
        match Self::try_current() {
            Some(kernel) => kernel,
            None => panic!("no kernel on this thread"),
        }
    }

    pub fn try_current() -> Option<&'static Kernel> {
        CURRENT.with(Cell::get)
    }

    /// Make `self` the calling thread's kernel.
    pub(crate) fn enter(&'static self) {
        CURRENT.with(|current| current.set(Some(self)));
    }

    #[inline]
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    #[inline]
    pub fn cpu(&self, hart: usize) -> &Cpu {
        &self.cpus[hart]
    }

    #[inline]
    pub fn cpus(&self) -> &[Cpu] {
        &self.cpus
    }

    #[inline]
    pub fn proc(&self, slot: usize) -> &Proc {
        &self.procs[slot]
    }

    #[inline]
    pub fn procs(&self) -> &[Proc] {
        &self.procs
    }

    #[inline]
    pub(crate) fn wait_lock(&self) -> &Spinlock<ParentTable> {
        &self.wait_lock
    }

    #[inline]
    pub fn kmem(&self) -> &Kmem {
        &self.kmem
    }

    #[inline]
    pub fn ftable(&self) -> &FileTable {
        &self.ftable
    }

    // -- Shutdown -------------------------------------------------------------

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Stop every hart at its next pass through the scheduler loop.
    /// Processes that are not running at that point never run again.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            klog_info!("rivet: halting");
        }
        for cpu in self.cpus() {
            cpu.context.kick();
        }
    }

    /// Wait until every hart has left its scheduler loop. Returns `false`
    /// if some hart is still busy after `timeout`.
    pub fn wait_halted(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cpus().iter().all(|cpu| !cpu.is_online()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn boot_step<T>(label: &str, step: impl FnOnce() -> KernelResult<T>) -> KernelResult<T> {
    klog_debug!("[boot:init] {}", label);
    let result = step();
    if let Err(err) = &result {
        klog_warn!("[boot:init] FAILURE in {} -> {}", label, err);
    }
    result
}

type BootWork = (ProcEntry, mpsc::Sender<KernelResult<Pid>>);

fn hart_main(kernel: &'static Kernel, hart: usize, boot_work: Option<BootWork>) {
    kernel.enter();
    enter_hart(kernel, hart);
    let cpu = kernel.cpu(hart);
    cpu.context.bind(thread::current());
    cpu.percpu().online.store(true, Ordering::Release);

    match boot_work {
        Some((init, done)) => {
            let result = kernel.main_init(init);
            match result {
                Ok(_) => kernel.started.store(true, Ordering::Release),
                Err(_) => kernel.halt(),
            }
            let _ = done.send(result);
        }
        None => {
            let mut backoff = Backoff::new();
            while !kernel.is_started() && !kernel.is_halted() {
                backoff.relax();
            }
        }
    }

    klog_info!("hart {} starting", hart);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| scheduler(kernel))) {
        kernel_panic(&format!("hart{}", hart), payload);
    }

    cpu.percpu().online.store(false, Ordering::Release);
}
