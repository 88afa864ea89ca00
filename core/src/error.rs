//! Kernel error type.
//!
//! The single error type returned by kernel operations. Every variant's
//! discriminant is the matching errno from `rivet_abi::errno`, so the
//! syscall layer can hand it to userspace with a cast.

use core::fmt;

use rivet_abi::errno;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernelError {
    // ── Process errors ──
    /// No such process (ESRCH)
    NoProcess = errno::ESRCH,
    /// Caller has no children to wait for (ECHILD)
    NoChild = errno::ECHILD,
    /// Process table full (EAGAIN)
    TableFull = errno::EAGAIN,
    /// Killed while blocked, nothing transferred (EINTR)
    Interrupted = errno::EINTR,

    // ── Resource errors ──
    /// Page allocator exhausted (ENOMEM)
    OutOfMemory = errno::ENOMEM,
    /// Per-process descriptor table full (EMFILE)
    OutOfHandles = errno::EMFILE,
    /// System-wide file table full (ENFILE)
    FileTableFull = errno::ENFILE,

    // ── Argument errors ──
    /// Bad file descriptor or wrong access mode (EBADF)
    BadHandle = errno::EBADF,
    /// User address outside the address space (EFAULT)
    BadAddress = errno::EFAULT,
    /// Invalid argument (EINVAL)
    InvalidArg = errno::EINVAL,
    /// Operation not supported by this file kind (ENOSYS)
    NotSupported = errno::ENOSYS,

    // ── Peer errors ──
    /// Read end of a pipe closed, nothing written (EPIPE)
    PeerClosed = errno::EPIPE,
}

impl KernelError {
    #[inline]
    pub fn to_errno(self) -> i32 {
        self as i32
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            KernelError::NoProcess => "no such process",
            KernelError::NoChild => "no child processes",
            KernelError::TableFull => "process table full",
            KernelError::Interrupted => "interrupted by kill",
            KernelError::OutOfMemory => "out of memory",
            KernelError::OutOfHandles => "too many open files",
            KernelError::FileTableFull => "file table full",
            KernelError::BadHandle => "bad file descriptor",
            KernelError::BadAddress => "bad address",
            KernelError::InvalidArg => "invalid argument",
            KernelError::NotSupported => "operation not supported",
            KernelError::PeerClosed => "broken pipe",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for KernelError {}

pub type KernelResult<T> = Result<T, KernelError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_are_errnos() {
        assert_eq!(KernelError::NoChild.to_errno(), errno::ECHILD);
        assert_eq!(KernelError::PeerClosed.to_errno(), errno::EPIPE);
        assert_eq!(KernelError::Interrupted.to_errno(), errno::EINTR);
        assert!(KernelError::OutOfMemory.to_errno() < 0);
    }

    #[test]
    fn display_uses_description() {
        assert_eq!(KernelError::TableFull.to_string(), "process table full");
    }
}
