//! System call layer.
//!
//! Handlers resolve descriptors against the caller's open-file table, call
//! into the kernel, and flatten `KernelResult` to `>= 0` / `-1`. Every
//! return path checks the caller's kill flag on the way out.

#[macro_use]
pub mod macros;
pub mod dispatch;
pub mod fs;
pub mod process_handlers;


pub use dispatch::syscall;
pub use fs::{sys_close, sys_dup, sys_pipe, sys_read, sys_write};
pub use process_handlers::{sys_exit, sys_getpid, sys_kill, sys_sbrk, sys_spawn, sys_wait, sys_yield};
