//! Physical page allocator.
//!
//! A fixed budget of `PGSIZE` frames handed out as RAII [`Page`]s. Freed
//! frames go back on a free list and are reused before fresh host memory
//! is touched. Frames are junk-filled on both alloc and free so stale
//! contents are never mistaken for initialized data.

use core::ops::{Deref, DerefMut};

use rivet_abi::PGSIZE;
use rivet_lib::{Spinlock, klog_debug};

type Frame = Box<[u8; PGSIZE]>;

const ALLOC_JUNK: u8 = 5;
const FREE_JUNK: u8 = 1;

struct KmemInner {
    free_list: Vec<Frame>,
    /// Frames that may still be handed out, free-listed or not.
    available: usize,
}

pub struct Kmem {
    capacity: usize,
    inner: Spinlock<KmemInner>,
}

impl Kmem {
    pub fn new(pages: usize) -> Self {
        klog_debug!("kalloc: {} pages ({} KiB)", pages, pages * PGSIZE / 1024);
        Self {
            capacity: pages,
            inner: Spinlock::new(
                "kmem",
                KmemInner {
                    free_list: Vec::new(),
                    available: pages,
                },
            ),
        }
    }

    /// Allocate one page, or `None` when the budget is exhausted.
    pub fn kalloc(&'static self) -> Option<Page> {
        let recycled = {
            let mut inner = self.inner.lock();
            if inner.available == 0 {
                return None;
            }
            inner.available -= 1;
            inner.free_list.pop()
        };
        let mut frame = recycled.unwrap_or_else(|| Box::new([0u8; PGSIZE]));
        frame.fill(ALLOC_JUNK);
        Some(Page {
            frame: Some(frame),
            pool: self,
        })
    }

    fn kfree(&self, mut frame: Frame) {
        frame.fill(FREE_JUNK);
        let mut inner = self.inner.lock();
        inner.free_list.push(frame);
        inner.available += 1;
        debug_assert!(inner.available <= self.capacity, "kfree: double free");
    }

    pub fn free_pages(&self) -> usize {
        self.inner.lock().available
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One allocated page. Returned to its pool on drop.
pub struct Page {
    frame: Option<Frame>,
    pool: &'static Kmem,
}

impl Page {
    /// Fill the whole page with zeroes.
    pub fn zero(&mut self) {
        self.fill(0);
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.frame {
            Some(frame) => &frame[..],
            None => &[],
        }
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.frame {
            Some(frame) => &mut frame[..],
            None => &mut [],
        }
    }
}

impl AsRef<[u8]> for Page {
    fn as_ref(&self) -> &[u8] {
        &self[..]
    }
}

impl AsMut<[u8]> for Page {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self[..]
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.kfree(frame);
        }
    }
}
