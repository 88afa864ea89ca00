//! User address spaces and the copy-in/copy-out seam.
//!
//! An [`AddressSpace`] is a root table page plus a flat run of user pages
//! mapping `[0, size)`. Anything that moves bytes between kernel buffers and
//! user memory goes through [`CopySource`] / [`CopyDest`], so pipe code
//! works the same whether the other side is a kernel slice or a range of
//! the calling process's memory ([`UserBuf`]).

use rivet_abi::{MAXVA, PGSIZE, pg_round_up};

use crate::error::{KernelError, KernelResult};
use crate::kalloc::{Kmem, Page};
use crate::scheduler::myproc;

/// Something bytes can be copied *from*, addressed by offset.
pub trait CopySource {
    fn copy_in(&self, offset: usize, dst: &mut [u8]) -> KernelResult<()>;
}

/// Something bytes can be copied *to*, addressed by offset.
pub trait CopyDest {
    fn copy_out(&mut self, offset: usize, src: &[u8]) -> KernelResult<()>;
}

fn checked_range(offset: usize, len: usize, limit: usize) -> KernelResult<core::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(offset..end),
        _ => Err(KernelError::BadAddress),
    }
}

impl CopySource for [u8] {
    fn copy_in(&self, offset: usize, dst: &mut [u8]) -> KernelResult<()> {
        let range = checked_range(offset, dst.len(), self.len())?;
        dst.copy_from_slice(&self[range]);
        Ok(())
    }
}

impl CopyDest for [u8] {
    fn copy_out(&mut self, offset: usize, src: &[u8]) -> KernelResult<()> {
        let range = checked_range(offset, src.len(), self.len())?;
        self[range].copy_from_slice(src);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Address spaces
// ---------------------------------------------------------------------------

pub struct AddressSpace {
    /// Top-level table page.
    _root: Page,
    pages: Vec<Page>,
    size: usize,
}

impl AddressSpace {
    /// Empty address space. `None` when no page is left for the root table.
    pub fn new(kmem: &'static Kmem) -> Option<Self> {
        let mut root = kmem.kalloc()?;
        root.zero();
        Some(Self {
            _root: root,
            pages: Vec::new(),
            size: 0,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of user pages backing the space.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Grow to `new_size` bytes with zeroed pages. Leaves the space untouched
    /// on failure. Returns the resulting size.
    pub fn grow(&mut self, kmem: &'static Kmem, new_size: usize) -> KernelResult<usize> {
        if new_size <= self.size {
            return Ok(self.size);
        }
        if new_size > MAXVA {
            return Err(KernelError::OutOfMemory);
        }

        let needed = pg_round_up(new_size) / PGSIZE;
        let mut fresh = Vec::with_capacity(needed.saturating_sub(self.pages.len()));
        while self.pages.len() + fresh.len() < needed {
            let Some(mut page) = kmem.kalloc() else {
                return Err(KernelError::OutOfMemory);
            };
            page.zero();
            fresh.push(page);
        }
        self.pages.extend(fresh);
        self.size = new_size;
        Ok(self.size)
    }

    /// Shrink to `new_size` bytes, releasing whole pages past the new end.
    pub fn shrink(&mut self, new_size: usize) -> usize {
        if new_size >= self.size {
            return self.size;
        }
        self.pages.truncate(pg_round_up(new_size) / PGSIZE);
        self.size = new_size;
        self.size
    }

    /// Page-by-page copy for a new child.
    pub fn try_clone(&self, kmem: &'static Kmem) -> Option<Self> {
        let mut copy = Self::new(kmem)?;
        for page in &self.pages {
            let mut dup = kmem.kalloc()?;
            dup.copy_from_slice(&page[..]);
            copy.pages.push(dup);
        }
        copy.size = self.size;
        Some(copy)
    }

    /// Copy `dst.len()` bytes starting at user address `va`.
    pub fn read(&self, va: usize, dst: &mut [u8]) -> KernelResult<()> {
        checked_range(va, dst.len(), self.size)?;
        let mut done = 0;
        while done < dst.len() {
            let addr = va + done;
            let off = addr % PGSIZE;
            let n = (PGSIZE - off).min(dst.len() - done);
            let page = &self.pages[addr / PGSIZE];
            dst[done..done + n].copy_from_slice(&page[off..off + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `src` to user address `va`.
    pub fn write(&mut self, va: usize, src: &[u8]) -> KernelResult<()> {
        checked_range(va, src.len(), self.size)?;
        let mut done = 0;
        while done < src.len() {
            let addr = va + done;
            let off = addr % PGSIZE;
            let n = (PGSIZE - off).min(src.len() - done);
            let page = &mut self.pages[addr / PGSIZE];
            page[off..off + n].copy_from_slice(&src[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Current-process user memory
// ---------------------------------------------------------------------------

/// `len` bytes of the calling process's memory starting at `addr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserBuf {
    addr: usize,
    len: usize,
}

impl UserBuf {
    pub const fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl CopySource for UserBuf {
    fn copy_in(&self, offset: usize, dst: &mut [u8]) -> KernelResult<()> {
        let range = checked_range(offset, dst.len(), self.len)?;
        copy_from_user(self.addr + range.start, dst)
    }
}

impl CopyDest for UserBuf {
    fn copy_out(&mut self, offset: usize, src: &[u8]) -> KernelResult<()> {
        let range = checked_range(offset, src.len(), self.len)?;
        copy_to_user(self.addr + range.start, src)
    }
}

/// Copy `src` into the calling process's memory at `addr`.
pub fn copy_to_user(addr: usize, src: &[u8]) -> KernelResult<()> {
    let p = myproc();
    let mut inner = p.lock();
    match inner.memory.as_mut() {
        Some(memory) => memory.write(addr, src),
        None => Err(KernelError::BadAddress),
    }
}

/// Copy from the calling process's memory at `addr` into `dst`.
pub fn copy_from_user(addr: usize, dst: &mut [u8]) -> KernelResult<()> {
    let p = myproc();
    let inner = p.lock();
    match inner.memory.as_ref() {
        Some(memory) => memory.read(addr, dst),
        None => Err(KernelError::BadAddress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(pages: usize) -> &'static Kmem {
        Box::leak(Box::new(Kmem::new(pages)))
    }

    #[test]
    fn copies_span_page_boundaries() {
        let kmem = pool(8);
        let mut space = AddressSpace::new(kmem).unwrap();
        space.grow(kmem, 3 * PGSIZE).unwrap();
        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let va = PGSIZE - 100;
        space.write(va, &data).unwrap();

        let mut back = vec![0u8; data.len()];
        space.read(va, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn out_of_range_access_faults() {
        let kmem = pool(4);
        let mut space = AddressSpace::new(kmem).unwrap();
        space.grow(kmem, 100).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(space.read(96, &mut buf), Err(KernelError::BadAddress));
        assert_eq!(space.write(usize::MAX - 2, &buf), Err(KernelError::BadAddress));
        assert!(space.read(92, &mut buf).is_ok());
    }

    #[test]
    fn failed_grow_leaves_space_unchanged() {
        let kmem = pool(3);
        let mut space = AddressSpace::new(kmem).unwrap();
        space.grow(kmem, PGSIZE).unwrap();
        assert_eq!(space.grow(kmem, 4 * PGSIZE), Err(KernelError::OutOfMemory));
        assert_eq!(space.size(), PGSIZE);
        assert_eq!(space.page_count(), 1);
        assert_eq!(kmem.free_pages(), 1);
    }

    #[test]
    fn clone_is_independent() {
        let kmem = pool(8);
        let mut parent = AddressSpace::new(kmem).unwrap();
        parent.grow(kmem, 10).unwrap();
        parent.write(0, b"parent").unwrap();
        let mut child = parent.try_clone(kmem).unwrap();
        child.write(0, b"child!").unwrap();

        let mut buf = [0u8; 6];
        parent.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        child.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn shrink_releases_pages() {
        let kmem = pool(5);
        let mut space = AddressSpace::new(kmem).unwrap();
        space.grow(kmem, 4 * PGSIZE).unwrap();
        assert_eq!(kmem.free_pages(), 0);
        space.shrink(PGSIZE + 1);
        assert_eq!(space.page_count(), 2);
        assert_eq!(kmem.free_pages(), 2);
        drop(space);
        assert_eq!(kmem.free_pages(), 5);
    }

    #[test]
    fn slices_are_copy_endpoints() {
        let src: &[u8] = b"abc";
        let mut byte = [0u8; 1];
        src.copy_in(2, &mut byte).unwrap();
        assert_eq!(byte[0], b'c');
        assert_eq!(src.copy_in(3, &mut byte), Err(KernelError::BadAddress));

        let mut dst = [0u8; 2];
        dst.copy_out(1, b"z").unwrap();
        assert_eq!(dst, [0, b'z']);
    }
}
