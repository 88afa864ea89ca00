pub mod lifecycle;
pub mod per_cpu;
pub mod proc;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod sleep;
pub mod switch_context;

#[cfg(test)]
mod sched_tests;

pub use lifecycle::{ProcEntry, exit, spawn, wait};
pub use per_cpu::Cpu;
pub use proc::{Proc, ProcInfo, ProcInner, getpid, killed, mycpu, myproc, set_killed, try_myproc};
pub use scheduler::{scheduler, yield_now};
pub use sleep::{Channel, sleep, wakeup};
pub use switch_context::Context;
