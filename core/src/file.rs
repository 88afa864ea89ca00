//! Open files.
//!
//! A [`File`] is what a descriptor slot points at. Descriptors share a
//! `File` through `Arc`; the file closes when the last descriptor holding
//! it goes away. Every open file occupies one entry of the system-wide
//! [`FileTable`] for as long as it lives.

use std::sync::Arc;

use rivet_abi::OpenFlags;
use rivet_abi::fs::ROOTINO;
use rivet_lib::{Spinlock, klog_warn};

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::pipe::{Pipe, PipeEnd};
use crate::platform::console_write;
use crate::vm::{CopyDest, CopySource};

/// Opaque handle to an inode, used for a process's working directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InodeRef(u32);

impl InodeRef {
    pub const ROOT: InodeRef = InodeRef(ROOTINO);

    #[inline]
    pub const fn inum(self) -> u32 {
        self.0
    }
}

/// System-wide count of open files, capped at `capacity`.
pub struct FileTable {
    open: Spinlock<usize>,
    capacity: usize,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            open: Spinlock::new("ftable", 0),
            capacity,
        }
    }

    pub(crate) fn reserve(&'static self) -> KernelResult<FileSlot> {
        let mut open = self.open.lock();
        if *open >= self.capacity {
            klog_warn!("ftable: all {} entries in use", self.capacity);
            return Err(KernelError::FileTableFull);
        }
        *open += 1;
        Ok(FileSlot { table: self })
    }

    pub fn open_count(&self) -> usize {
        *self.open.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One claimed file-table entry, released on drop.
pub(crate) struct FileSlot {
    table: &'static FileTable,
}

impl Drop for FileSlot {
    fn drop(&mut self) {
        *self.table.open.lock() -= 1;
    }
}

pub enum FileKind {
    Pipe(Arc<Pipe>),
    Console,
}

pub struct File {
    kind: FileKind,
    flags: OpenFlags,
    _slot: FileSlot,
}

const CONSOLE_CHUNK: usize = 128;

impl File {
    pub(crate) fn new(kind: FileKind, flags: OpenFlags, slot: FileSlot) -> Self {
        Self {
            kind,
            flags,
            _slot: slot,
        }
    }

    /// A read/write handle on the platform console.
    pub(crate) fn console(kernel: &'static Kernel) -> KernelResult<Arc<File>> {
        let slot = kernel.ftable().reserve()?;
        Ok(Arc::new(File::new(FileKind::Console, OpenFlags::READ_WRITE, slot)))
    }

    #[inline]
    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    #[inline]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Read up to `n` bytes into `dst`.
    pub fn read<D: CopyDest + ?Sized>(&self, dst: &mut D, n: usize) -> KernelResult<usize> {
        if !self.flags.readable() {
            return Err(KernelError::BadHandle);
        }
        match &self.kind {
            FileKind::Pipe(pipe) => pipe.read(dst, n),
            FileKind::Console => Err(KernelError::NotSupported),
        }
    }

    /// Write `n` bytes from `src`.
    pub fn write<S: CopySource + ?Sized>(&self, src: &S, n: usize) -> KernelResult<usize> {
        if !self.flags.writable() {
            return Err(KernelError::BadHandle);
        }
        match &self.kind {
            FileKind::Pipe(pipe) => pipe.write(src, n),
            FileKind::Console => {
                let mut buf = [0u8; CONSOLE_CHUNK];
                let mut done = 0;
                while done < n {
                    let len = CONSOLE_CHUNK.min(n - done);
                    if let Err(err) = src.copy_in(done, &mut buf[..len]) {
                        return if done == 0 { Err(err) } else { Ok(done) };
                    }
                    console_write(&String::from_utf8_lossy(&buf[..len]));
                    done += len;
                }
                Ok(done)
            }
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let FileKind::Pipe(pipe) = &self.kind {
            let end = if self.flags.writable() {
                PipeEnd::Write
            } else {
                PipeEnd::Read
            };
            pipe.close(end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_inode_is_the_fs_root() {
        assert_eq!(InodeRef::ROOT.inum(), ROOTINO);
    }
}
