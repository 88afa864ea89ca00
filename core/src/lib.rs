//! Rivet kernel core: the process table, per-hart schedulers, sleep and
//! wakeup, pipes, and the system-call layer on top of them.

pub mod error;
pub mod file;
pub mod kalloc;
pub mod kernel;
pub mod pipe;
pub mod platform;
pub mod scheduler;
#[macro_use]
pub mod syscall;
pub mod vm;

#[cfg(test)]
mod test_support;

pub use error::{KernelError, KernelResult};
pub use file::{File, FileKind, InodeRef};
pub use kernel::Kernel;
pub use pipe::{Pipe, PipeEnd, pipealloc};
pub use scheduler::lifecycle::grow_memory;
pub use scheduler::{
    Channel, ProcEntry, ProcInfo, exit, getpid, killed, myproc, set_killed, sleep, spawn, wait,
    wakeup, yield_now,
};
pub use vm::{UserBuf, copy_from_user, copy_to_user};
