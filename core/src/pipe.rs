//! Pipes.
//!
//! A pipe is a `PIPESIZE`-byte ring in one kernel page, owned jointly by
//! its read-end and write-end [`File`]s through an `Arc`. The page goes back
//! to the allocator when both ends are gone.
//!
//! Everything below is guarded by the pipe's own lock. Readers sleep on
//! `not_empty`, writers on `not_full`; both channels pair with that lock.
//! A pipe lock may be held while taking a process lock, never the reverse.

use std::sync::Arc;

use rivet_abi::{OpenFlags, PIPESIZE};
use rivet_lib::{ByteRing, Spinlock, klog_trace};

use crate::error::{KernelError, KernelResult};
use crate::file::{File, FileKind};
use crate::kalloc::Page;
use crate::kernel::Kernel;
use crate::scheduler::{Channel, killed, myproc, sleep};
use crate::vm::{CopyDest, CopySource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

struct PipeInner {
    ring: ByteRing<Page>,
    read_open: bool,
    write_open: bool,
}

pub struct Pipe {
    kernel: &'static Kernel,
    lock: Spinlock<PipeInner>,
    not_empty: Channel,
    not_full: Channel,
}

/// Create a pipe and return its (read, write) ends.
pub fn pipealloc(kernel: &'static Kernel) -> KernelResult<(Arc<File>, Arc<File>)> {
    let read_slot = kernel.ftable().reserve()?;
    let write_slot = kernel.ftable().reserve()?;
    let page = kernel.kmem().kalloc().ok_or(KernelError::OutOfMemory)?;

    let pipe = Arc::new(Pipe {
        kernel,
        lock: Spinlock::new(
            "pipe",
            PipeInner {
                ring: ByteRing::new(page, PIPESIZE),
                read_open: true,
                write_open: true,
            },
        ),
        not_empty: Channel::unique(),
        not_full: Channel::unique(),
    });

    let read = File::new(FileKind::Pipe(Arc::clone(&pipe)), OpenFlags::READABLE, read_slot);
    let write = File::new(FileKind::Pipe(pipe), OpenFlags::WRITABLE, write_slot);
    Ok((Arc::new(read), Arc::new(write)))
}

impl Pipe {
    /// Write `n` bytes from `src`, blocking while the ring is full.
    ///
    /// Returns the number of bytes written. Stops early, with a short count,
    /// if the read end closes or the caller is killed part way through; with
    /// nothing written those cases fail with `PeerClosed` and `Interrupted`.
    pub fn write<S: CopySource + ?Sized>(&self, src: &S, n: usize) -> KernelResult<usize> {
        let p = myproc();
        let mut i = 0;

        let mut inner = self.lock.lock();
        while i < n {
            if !inner.read_open || killed(p) {
                let err = if inner.read_open {
                    KernelError::Interrupted
                } else {
                    KernelError::PeerClosed
                };
                if i == 0 {
                    return Err(err);
                }
                self.kernel.wakeup(self.not_empty);
                klog_trace!("pipe: write cut short at {} of {}: {}", i, n, err);
                return Ok(i);
            }

            if inner.ring.is_full() {
                self.kernel.wakeup(self.not_empty);
                inner = sleep(self.not_full, inner);
                continue;
            }

            let mut byte = [0u8; 1];
            if let Err(err) = src.copy_in(i, &mut byte) {
                if i == 0 {
                    return Err(err);
                }
                break;
            }
            inner.ring.try_push(byte[0]);
            i += 1;
        }
        self.kernel.wakeup(self.not_empty);

        Ok(i)
    }

    /// Read up to `n` bytes into `dst`, blocking while the ring is empty and
    /// the write end is open.
    ///
    /// `Ok(0)` with the write end closed is end of stream. A caller killed
    /// while blocked fails with `Interrupted` and takes no data.
    pub fn read<D: CopyDest + ?Sized>(&self, dst: &mut D, n: usize) -> KernelResult<usize> {
        let p = myproc();

        let mut inner = self.lock.lock();
        while inner.ring.is_empty() && inner.write_open {
            if killed(p) {
                return Err(KernelError::Interrupted);
            }
            inner = sleep(self.not_empty, inner);
            if killed(p) {
                return Err(KernelError::Interrupted);
            }
        }

        let mut i = 0;
        while i < n {
            let Some(byte) = inner.ring.peek() else {
                break;
            };
            if let Err(err) = dst.copy_out(i, &[byte]) {
                if i == 0 {
                    return Err(err);
                }
                break;
            }
            inner.ring.try_pop();
            i += 1;
        }
        self.kernel.wakeup(self.not_full);

        Ok(i)
    }

    /// Close one end and wake whoever waits on the other.
    pub fn close(&self, end: PipeEnd) {
        let mut inner = self.lock.lock();
        match end {
            PipeEnd::Read => {
                inner.read_open = false;
                self.kernel.wakeup(self.not_full);
            }
            PipeEnd::Write => {
                inner.write_open = false;
                self.kernel.wakeup(self.not_empty);
            }
        }
    }

    /// Bytes written but not yet read.
    pub fn buffered(&self) -> usize {
        self.lock.lock().ring.len()
    }

    /// Total bytes ever written and read.
    pub fn cursors(&self) -> (u64, u64) {
        let inner = self.lock.lock();
        (inner.ring.nwrite(), inner.ring.nread())
    }

    pub fn is_open(&self, end: PipeEnd) -> bool {
        let inner = self.lock.lock();
        match end {
            PipeEnd::Read => inner.read_open,
            PipeEnd::Write => inner.write_open,
        }
    }
}
