//! Open-file ABI types.

use bitflags::bitflags;

bitflags! {
    /// Access mode of an open file handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const READ_WRITE = Self::READABLE.bits() | Self::WRITABLE.bits();
    }
}

impl OpenFlags {
    #[inline]
    pub fn readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }
}

/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_end_flags_are_disjoint() {
        assert!(OpenFlags::READABLE.readable());
        assert!(!OpenFlags::READABLE.writable());
        assert!(OpenFlags::WRITABLE.writable());
        assert!((OpenFlags::READABLE & OpenFlags::WRITABLE).is_empty());
        assert_eq!(OpenFlags::READ_WRITE, OpenFlags::READABLE | OpenFlags::WRITABLE);
    }
}
