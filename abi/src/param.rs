//! Compile-time kernel limits.

/// Maximum number of harts a kernel can be booted with.
pub const NCPU: usize = 8;

/// Default process table capacity.
pub const NPROC: usize = 64;

/// Hard upper bound on the process table; slot indices must fit in a [`Pid`](crate::Pid).
pub const MAX_PROCS: usize = 256;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files system-wide.
pub const NFILE: usize = 100;

/// Pipe ring capacity in bytes.
pub const PIPESIZE: usize = 512;

/// Page size handed out by the page allocator.
pub const PGSIZE: usize = 4096;

/// Longest process debug name, in bytes.
pub const PROC_NAME_MAX: usize = 16;

/// Largest address space a process may grow to.
pub const MAXVA: usize = 64 * 1024 * 1024;

/// Round `sz` up to a page boundary.
#[inline]
pub const fn pg_round_up(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}
