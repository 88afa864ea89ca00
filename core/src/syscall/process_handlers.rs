use rivet_abi::Pid;

use crate::kernel::Kernel;
use crate::scheduler::lifecycle::grow_memory;
use crate::scheduler::{exit, getpid, spawn, wait, yield_now};
use crate::syscall::dispatch::syscall_return;
use crate::vm::copy_to_user;

define_syscall!(sys_getpid() {
    Ok(getpid().as_raw() as usize)
});

pub fn sys_exit(status: i32) -> ! {
    exit(status)
}

define_syscall!(
    /// Reap a child. Stores its exit status at `status_addr` unless that
    /// is zero, and returns its pid.
    sys_wait(status_addr: usize) {
        let (pid, status) = wait()?;
        if status_addr != 0 {
            copy_to_user(status_addr, &status.to_le_bytes())?;
        }
        Ok(pid.as_raw() as usize)
    }
);

define_syscall!(sys_kill(pid: u32) {
    Kernel::current().kill(Pid::from_raw(pid))?;
    Ok(0)
});

define_syscall!(sys_yield() {
    yield_now();
    Ok(0)
});

define_syscall!(
    /// Grow (or with negative `n`, shrink) memory. Returns the old size,
    /// which is the address of the first new byte.
    sys_sbrk(n: isize) {
        grow_memory(n)
    }
);

/// Start a child running `entry`; returns its pid. Programs are host
/// closures, so this call has no syscall number.
pub fn sys_spawn<F>(name: &str, entry: F) -> isize
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let result = spawn(name, entry).map(|pid| pid.as_raw() as usize);
    syscall_return("sys_spawn", result)
}
