use rivet_abi::syscall::*;
use rivet_lib::{klog_debug, klog_info};

use super::fs::{sys_close, sys_dup, sys_pipe, sys_read, sys_write};
use super::process_handlers::{sys_exit, sys_getpid, sys_kill, sys_sbrk, sys_wait, sys_yield};
use crate::error::{KernelError, KernelResult};
use crate::scheduler::{exit, killed, try_myproc};

/// Flatten a handler result for user code, then exit the caller if it was
/// killed while in the kernel.
pub fn syscall_return(name: &str, result: KernelResult<usize>) -> isize {
    let ret = match result {
        Ok(value) => value as isize,
        Err(err) => {
            klog_debug!("SYSCALL: {} -> {}", name, err);
            -1
        }
    };

    if let Some(p) = try_myproc() {
        if killed(p) {
            exit(-1);
        }
    }
    ret
}

/// Dispatch numbered syscall `num` with raw register arguments.
pub fn syscall(num: u64, args: [usize; 3]) -> isize {
    match num {
        SYSCALL_EXIT => sys_exit(args[0] as i32),
        SYSCALL_WAIT => sys_wait(args[0]),
        SYSCALL_KILL => sys_kill(args[0] as u32),
        SYSCALL_GETPID => sys_getpid(),
        SYSCALL_YIELD => sys_yield(),
        SYSCALL_SBRK => sys_sbrk(args[0] as isize),
        SYSCALL_PIPE => sys_pipe(args[0]),
        SYSCALL_READ => sys_read(args[0] as i32, args[1], args[2]),
        SYSCALL_WRITE => sys_write(args[0] as i32, args[1], args[2]),
        SYSCALL_CLOSE => sys_close(args[0] as i32),
        SYSCALL_DUP => sys_dup(args[0] as i32),
        _ => {
            klog_info!("SYSCALL: Unknown syscall {} -> ENOSYS", num);
            syscall_return("unknown", Err(KernelError::NotSupported))
        }
    }
}
