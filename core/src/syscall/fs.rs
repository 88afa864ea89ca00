//! File-descriptor syscalls.

use std::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::file::File;
use crate::kernel::Kernel;
use crate::pipe::pipealloc;
use crate::scheduler::myproc;
use crate::vm::{UserBuf, copy_to_user};

fn fd_index(fd: i32) -> KernelResult<usize> {
    usize::try_from(fd).map_err(|_| KernelError::BadHandle)
}

/// The open file behind `fd` in the calling process.
fn fd_file(fd: i32) -> KernelResult<Arc<File>> {
    let fd = fd_index(fd)?;
    myproc().lock().file(fd)
}

define_syscall!(sys_read(fd: i32, addr: usize, n: usize) {
    let file = fd_file(fd)?;
    file.read(&mut UserBuf::new(addr, n), n)
});

define_syscall!(sys_write(fd: i32, addr: usize, n: usize) {
    let file = fd_file(fd)?;
    file.write(&UserBuf::new(addr, n), n)
});

define_syscall!(sys_close(fd: i32) {
    let fd = fd_index(fd)?;
    // Take the file out under the lock; the close runs once it is released.
    let file = myproc().lock().ofile.get_mut(fd).and_then(Option::take);
    match file {
        Some(file) => {
            drop(file);
            Ok(0)
        }
        None => Err(KernelError::BadHandle),
    }
});

define_syscall!(sys_dup(fd: i32) {
    let file = fd_file(fd)?;
    myproc().lock().fdalloc(&file)
});

define_syscall!(
    /// Create a pipe and store its read and write descriptors as two
    /// little-endian `i32`s at `fdarray`.
    sys_pipe(fdarray: usize) {
        let (rf, wf) = pipealloc(Kernel::current())?;
        let p = myproc();

        let fds = {
            let mut inner = p.lock();
            match inner.fdalloc(&rf) {
                Ok(fd0) => match inner.fdalloc(&wf) {
                    Ok(fd1) => Ok((fd0, fd1)),
                    Err(err) => {
                        inner.ofile[fd0] = None;
                        Err(err)
                    }
                },
                Err(err) => Err(err),
            }
        };
        let (fd0, fd1) = fds?;

        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&(fd0 as i32).to_le_bytes());
        bytes[4..].copy_from_slice(&(fd1 as i32).to_le_bytes());
        if let Err(err) = copy_to_user(fdarray, &bytes) {
            let taken = {
                let mut inner = p.lock();
                (inner.ofile[fd0].take(), inner.ofile[fd1].take())
            };
            drop(taken);
            return Err(err);
        }
        Ok(0)
    }
);
