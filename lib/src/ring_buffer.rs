/// Fixed-capacity byte ring addressed by free-running cursors.
///
/// `nwrite` and `nread` only ever grow; occupancy is `nwrite - nread` and
/// stays within `[0, capacity]`. Slot `i` lives at `i % capacity` in the
/// backing storage, which may be larger than `capacity`.
#[derive(Debug)]
pub struct ByteRing<S> {
    storage: S,
    capacity: u64,
    nread: u64,
    nwrite: u64,
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> ByteRing<S> {
    pub fn new(storage: S, capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity <= storage.as_ref().len(),
            "ring capacity exceeds backing storage"
        );
        Self {
            storage,
            capacity: capacity as u64,
            nread: 0,
            nwrite: 0,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Bytes currently buffered.
    #[inline(always)]
    pub fn len(&self) -> usize {
        (self.nwrite - self.nread) as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.nwrite == self.nread
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.nwrite == self.nread + self.capacity
    }

    #[inline(always)]
    pub fn nread(&self) -> u64 {
        self.nread
    }

    #[inline(always)]
    pub fn nwrite(&self) -> u64 {
        self.nwrite
    }

    /// Push without overwrite; returns true on success, false if full.
    #[inline]
    pub fn try_push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        let idx = (self.nwrite % self.capacity) as usize;
        self.storage.as_mut()[idx] = byte;
        self.nwrite += 1;
        debug_assert!(self.len() <= self.capacity());
        true
    }

    /// Oldest byte, left in place.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        Some(self.storage.as_ref()[(self.nread % self.capacity) as usize])
    }

    #[inline]
    pub fn try_pop(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.nread += 1;
        Some(byte)
    }
}
