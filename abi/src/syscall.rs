//! Syscall numbers (kernel-userland ABI).
//!
//! Numbered calls are dispatched by `rivet_core::syscall::syscall`. Process
//! creation is not numbered: hosted programs are closures, so `sys_spawn`
//! is only reachable through its typed entry point.

// =============================================================================
// Process
// =============================================================================

pub const SYSCALL_EXIT: u64 = 1;
pub const SYSCALL_WAIT: u64 = 2;
pub const SYSCALL_KILL: u64 = 3;
pub const SYSCALL_GETPID: u64 = 4;
pub const SYSCALL_YIELD: u64 = 5;
pub const SYSCALL_SBRK: u64 = 6;

// =============================================================================
// Files
// =============================================================================

pub const SYSCALL_PIPE: u64 = 10;
pub const SYSCALL_READ: u64 = 11;
pub const SYSCALL_WRITE: u64 = 12;
pub const SYSCALL_CLOSE: u64 = 13;
pub const SYSCALL_DUP: u64 = 14;

/// Name of a numbered syscall, for diagnostics.
pub const fn syscall_name(num: u64) -> Option<&'static str> {
    Some(match num {
        SYSCALL_EXIT => "exit",
        SYSCALL_WAIT => "wait",
        SYSCALL_KILL => "kill",
        SYSCALL_GETPID => "getpid",
        SYSCALL_YIELD => "yield",
        SYSCALL_SBRK => "sbrk",
        SYSCALL_PIPE => "pipe",
        SYSCALL_READ => "read",
        SYSCALL_WRITE => "write",
        SYSCALL_CLOSE => "close",
        SYSCALL_DUP => "dup",
        _ => return None,
    })
}
